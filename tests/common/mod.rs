//! Common test utilities for all integration tests.
//!
//! Provides mock fetchers, transports and a manual clock.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrets_cache_client::config::Endpoint;
use secrets_cache_client::credentials::CredentialsProvider;
use secrets_cache_client::secrets::{
    Clock, GetSecretValueRequest, GetSecretValueResponse, LatencyProbe, SecretDataType, SecretFetcher,
    SecretInfo, SecretTransport, TransportFactory,
};
use secrets_cache_client::{Error, RemoteError, Result};
use tokio::sync::Notify;

/// Starting point for [`ManualClock`]
pub const T0: i64 = 1_700_000_000_000;

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(T0)))
    }

    pub fn set(&self, now_ms: i64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Clock that follows tokio's clock, so paused tests move it with timers
#[derive(Debug)]
pub struct TokioClock(tokio::time::Instant);

impl TokioClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(tokio::time::Instant::now()))
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        T0 + self.0.elapsed().as_millis() as i64
    }
}

/// Fetcher that counts calls per name and can be slowed, gated or failed
#[derive(Default)]
pub struct MockFetcher {
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    delay: Option<Duration>,
    gates: HashMap<String, Arc<Notify>>,
    data_type: Option<SecretDataType>,
    extended_config: Option<String>,
    failure: Mutex<Option<RemoteError>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls for `secret_name` block until the returned gate is notified
    pub fn with_gate(mut self, secret_name: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gates.insert(secret_name.to_string(), gate.clone());
        (self, gate)
    }

    pub fn with_data_type(mut self, data_type: SecretDataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn with_extended_config(mut self, extended_config: &str) -> Self {
        self.extended_config = Some(extended_config.to_string());
        self
    }

    /// Make every following call fail with `error`; `None` restores success
    pub fn fail_with(&self, error: Option<RemoteError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn calls(&self, secret_name: &str) -> usize {
        self.calls.lock().unwrap().get(secret_name).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretFetcher for MockFetcher {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get_secret_value(&self, request: &GetSecretValueRequest) -> Result<SecretInfo> {
        let name = request.secret_name.clone();
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(name.clone()).or_default();
            *count += 1;
            *count
        };
        self.total.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = self.gates.get(&name) {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(Error::remote(&name, "kms.mock.aliyuncs.com(mock)", 1, error));
        }

        let mut info = SecretInfo::text(&name, format!("v{n}"), format!("{name}-value-{n}"));
        if let Some(data_type) = &self.data_type {
            info.secret_data_type = data_type.clone();
        }
        info.extended_config = self.extended_config.clone();
        Ok(info)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// One scripted transport reply
#[derive(Clone)]
pub struct Reply {
    pub after: Duration,
    pub result: std::result::Result<String, RemoteError>,
}

impl Reply {
    /// Succeed with the given version id
    pub fn ok(after_ms: u64, version_id: &str) -> Self {
        Self { after: Duration::from_millis(after_ms), result: Ok(version_id.to_string()) }
    }

    pub fn err(after_ms: u64, error: RemoteError) -> Self {
        Self { after: Duration::from_millis(after_ms), result: Err(error) }
    }
}

/// Transport that replays a script; the last reply repeats forever
pub struct ScriptedTransport {
    replies: Mutex<Vec<Reply>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        assert!(!replies.is_empty());
        Arc::new(Self { replies: Mutex::new(replies), calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretTransport for ScriptedTransport {
    async fn get_secret_value(
        &self,
        request: &GetSecretValueRequest,
    ) -> std::result::Result<GetSecretValueResponse, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies[0].clone()
            }
        };
        tokio::time::sleep(reply.after).await;
        reply.result.map(|version_id| GetSecretValueResponse {
            secret_name: request.secret_name.clone(),
            version_id,
            secret_data: "scripted".into(),
            secret_data_type: Some("text".to_string()),
            ..Default::default()
        })
    }
}

/// Hands out scripted transports by region id
#[derive(Default)]
pub struct ScriptedFactory {
    transports: HashMap<String, Arc<ScriptedTransport>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, region_id: &str, transport: Arc<ScriptedTransport>) -> Self {
        self.transports.insert(region_id.to_string(), transport);
        self
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(
        &self,
        endpoint: &Endpoint,
        _credentials: Option<Arc<dyn CredentialsProvider>>,
    ) -> Result<Arc<dyn SecretTransport>> {
        match self.transports.get(endpoint.region_id()) {
            Some(transport) => Ok(transport.clone()),
            None => Err(Error::config(format!("no scripted transport for {}", endpoint.region_id()))),
        }
    }
}

/// Probe that reports every host as unreachable, keeping configured order
pub struct NoProbe;

#[async_trait]
impl LatencyProbe for NoProbe {
    async fn probe(&self, _host: &str) -> Option<Duration> {
        None
    }
}
