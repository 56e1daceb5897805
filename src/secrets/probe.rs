//! Endpoint latency probing used to order endpoints at startup.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::config::Endpoint;

/// Bound on a single probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// NOTE: expect() acceptable - pattern is validated by tests
static PING_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time[=<](\d+(?:\.\d+)?) ?ms").expect("PING_TIME should be a valid regex"));

/// Measures round-trip latency to a host
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// `None` when the host is unreachable or the probe timed out
    async fn probe(&self, host: &str) -> Option<Duration>;
}

/// Single-packet ICMP probe via the system `ping` binary
#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl Default for PingProbe {
    fn default() -> Self {
        Self { timeout: PROBE_TIMEOUT }
    }
}

impl PingProbe {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl LatencyProbe for PingProbe {
    async fn probe(&self, host: &str) -> Option<Duration> {
        // ping wants a bare host name
        let host = host.split(':').next().unwrap_or(host);
        let count_flag = if cfg!(windows) { "-n" } else { "-c" };

        let mut command = Command::new("ping");
        command.arg(count_flag).arg("1").arg(host).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(_)) | Ok(Err(_)) => return None,
            Err(_) => {
                debug!(host = %host, "Latency probe timed out");
                return None;
            }
        };

        parse_ping_output(&String::from_utf8_lossy(&output.stdout))
    }
}

pub(crate) fn parse_ping_output(output: &str) -> Option<Duration> {
    let captures = PING_TIME.captures(output)?;
    let millis: f64 = captures.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_secs_f64(millis / 1000.0))
}

/// Probe every endpoint concurrently and sort by ascending latency.
///
/// Unreachable endpoints sort last, keeping their relative order.
pub async fn sort_by_latency(endpoints: Vec<Endpoint>, probe: &dyn LatencyProbe) -> Vec<Endpoint> {
    let probes = endpoints.iter().map(|endpoint| {
        let host = endpoint.resolved_host();
        async move { probe.probe(&host).await }
    });
    let latencies = join_all(probes).await;

    let mut ranked: Vec<(Duration, Endpoint)> = endpoints
        .into_iter()
        .zip(latencies)
        .map(|(endpoint, latency)| {
            debug!(endpoint = %endpoint.key(), latency_ms = ?latency.map(|l| l.as_millis()), "Probed endpoint");
            (latency.unwrap_or(Duration::MAX), endpoint)
        })
        .collect();
    ranked.sort_by_key(|(latency, _)| *latency);
    ranked.into_iter().map(|(_, endpoint)| endpoint).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FixedProbe(HashMap<String, Option<Duration>>);

    #[async_trait]
    impl LatencyProbe for FixedProbe {
        async fn probe(&self, host: &str) -> Option<Duration> {
            self.0.get(host).copied().flatten()
        }
    }

    #[test]
    fn test_parse_linux_output() {
        let output = "PING kms.cn-hangzhou.aliyuncs.com (1.2.3.4) 56(84) bytes of data.\n\
64 bytes from 1.2.3.4: icmp_seq=1 ttl=52 time=12.4 ms\n";
        let latency = parse_ping_output(output).unwrap();
        assert!((latency.as_secs_f64() * 1000.0 - 12.4).abs() < 1e-6);
    }

    #[test]
    fn test_parse_windows_output() {
        let output = "Reply from 1.2.3.4: bytes=32 time=8ms TTL=52";
        assert_eq!(parse_ping_output(output), Some(Duration::from_millis(8)));
        assert_eq!(
            parse_ping_output("Reply from 1.2.3.4: bytes=32 time<1ms TTL=128"),
            Some(Duration::from_millis(1))
        );
    }

    #[test]
    fn test_parse_unreachable_output() {
        assert_eq!(parse_ping_output("Request timeout for icmp_seq 0"), None);
        assert_eq!(parse_ping_output(""), None);
    }

    #[tokio::test]
    async fn test_sort_by_latency_puts_unreachable_last() {
        let slow = Endpoint::new("slow");
        let fast = Endpoint::new("fast");
        let dead = Endpoint::new("dead");
        let probe = FixedProbe(HashMap::from([
            (slow.resolved_host(), Some(Duration::from_millis(80))),
            (fast.resolved_host(), Some(Duration::from_millis(5))),
            (dead.resolved_host(), None),
        ]));

        let sorted = sort_by_latency(vec![dead.clone(), slow.clone(), fast.clone()], &probe).await;
        assert_eq!(sorted, vec![fast, slow, dead]);
    }
}
