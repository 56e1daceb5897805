//! Refresh scheduling policy.
//!
//! A strategy reads a per-secret TTL out of the secret itself and computes
//! when the next background refresh should run.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::errors::Result;
use crate::secrets::types::{CachedSecretInfo, SecretInfo};

/// JSON property read from the extended configuration by default
pub const DEFAULT_TTL_PROPERTY: &str = "ttl";

#[async_trait]
pub trait RefreshStrategy: Send + Sync {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// TTL the secret declares for itself, if any
    fn parse_ttl(&self, info: &SecretInfo) -> Option<Duration>;

    /// Next execution time (epoch ms) derived from a stored entry
    fn parse_next_execute_time(&self, entry: &CachedSecretInfo) -> Option<i64> {
        let ttl = self.parse_ttl(&entry.secret_info)?;
        Some(entry.refresh_timestamp_ms.saturating_add(duration_ms(ttl)))
    }

    /// Next execution time (epoch ms) from a TTL and the last refresh
    fn next_execute_time(&self, _secret_name: &str, ttl: Duration, last_refresh_ms: i64, now_ms: i64) -> i64 {
        let ttl_ms = duration_ms(ttl);
        let next = last_refresh_ms.saturating_add(ttl_ms);
        if next > now_ms {
            next
        } else {
            now_ms.saturating_add(ttl_ms)
        }
    }
}

pub(crate) fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Reads a millisecond TTL from a JSON property of the extended configuration
#[derive(Debug, Clone)]
pub struct JsonTtlRefreshStrategy {
    ttl_property: String,
}

impl Default for JsonTtlRefreshStrategy {
    fn default() -> Self {
        Self { ttl_property: DEFAULT_TTL_PROPERTY.to_string() }
    }
}

impl JsonTtlRefreshStrategy {
    pub fn new(ttl_property: impl Into<String>) -> Self {
        Self { ttl_property: ttl_property.into() }
    }

    pub fn ttl_property(&self) -> &str {
        &self.ttl_property
    }
}

#[async_trait]
impl RefreshStrategy for JsonTtlRefreshStrategy {
    fn parse_ttl(&self, info: &SecretInfo) -> Option<Duration> {
        let raw = info.extended_config.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }

        let config: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(secret_name = %info.secret_name, error = %e, "Extended config is not valid JSON");
                return None;
            }
        };

        // Numbers or numeric strings; non-positive values mean "not set"
        let ttl = match config.get(&self.ttl_property)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }?;
        (ttl > 0).then(|| Duration::from_millis(ttl as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with(extended: &str) -> SecretInfo {
        SecretInfo::text("db-pass", "v1", "x").with_extended_config(extended)
    }

    #[test]
    fn test_parse_ttl_from_number_and_string() {
        let strategy = JsonTtlRefreshStrategy::default();
        assert_eq!(strategy.parse_ttl(&info_with(r#"{"ttl": 60000}"#)), Some(Duration::from_secs(60)));
        assert_eq!(strategy.parse_ttl(&info_with(r#"{"ttl": "1500"}"#)), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_ttl_ignores_missing_or_invalid() {
        let strategy = JsonTtlRefreshStrategy::default();
        assert_eq!(strategy.parse_ttl(&SecretInfo::text("a", "v1", "x")), None);
        assert_eq!(strategy.parse_ttl(&info_with("not json")), None);
        assert_eq!(strategy.parse_ttl(&info_with(r#"{"ttl": 0}"#)), None);
        assert_eq!(strategy.parse_ttl(&info_with(r#"{"ttl": -5}"#)), None);
        assert_eq!(strategy.parse_ttl(&info_with(r#"{"other": 10}"#)), None);
    }

    #[test]
    fn test_custom_property_name() {
        let strategy = JsonTtlRefreshStrategy::new("refreshInterval");
        assert_eq!(
            strategy.parse_ttl(&info_with(r#"{"refreshInterval": 2000, "ttl": 1}"#)),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_parse_next_execute_time() {
        let strategy = JsonTtlRefreshStrategy::default();
        let entry = CachedSecretInfo::new(info_with(r#"{"ttl": 1000}"#), "ACSCurrent", 5_000);
        assert_eq!(strategy.parse_next_execute_time(&entry), Some(6_000));

        let plain = CachedSecretInfo::new(SecretInfo::text("a", "v1", "x"), "ACSCurrent", 5_000);
        assert_eq!(strategy.parse_next_execute_time(&plain), None);
    }

    #[test]
    fn test_next_execute_time_rolls_forward_when_past() {
        let strategy = JsonTtlRefreshStrategy::default();
        let ttl = Duration::from_millis(1_000);
        assert_eq!(strategy.next_execute_time("a", ttl, 10_000, 10_500), 11_000);
        assert_eq!(strategy.next_execute_time("a", ttl, 10_000, 12_000), 13_000);
    }
}
