//! # Resilient Secret Fetcher
//!
//! Queries the remote service across every configured endpoint.
//!
//! A fetch first tries the lowest-latency endpoint once. If that fails with a
//! recoverable error, all endpoints (including the failed one) race: each
//! retries under the backoff strategy until it succeeds, hits its retry
//! ceiling, sees a non-recoverable error, or observes the shared stop token.
//! The first success wins. The whole race is bounded by the request waiting
//! time.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::config::{Endpoint, EndpointKey, PropertySource, RawProperties, DEFAULT_PROPERTIES_FILE};
use crate::credentials::{CredentialsConfig, CredentialsProvider};
use crate::errors::{EndpointFailure, Error, RemoteError, Result};
use crate::observability::{log_client_config, MetricsRecorder};
use crate::secrets::backoff::{BackoffStrategy, ExponentialBackoff};
use crate::secrets::probe::{sort_by_latency, LatencyProbe, PingProbe};
use crate::secrets::transport::{
    GetSecretValueRequest, GetSecretValueResponse, HttpTransportFactory, SecretTransport,
    TransportFactory,
};
use crate::secrets::types::SecretInfo;
use crate::secret_span;

/// Default bound on one fetch across all endpoints
pub const DEFAULT_REQUEST_WAITING_TIME: Duration = Duration::from_millis(120_000);

/// Source of secret values for the cache
#[async_trait]
pub trait SecretFetcher: Send + Sync {
    /// Resolve configuration and prepare clients. Idempotent.
    async fn init(&self) -> Result<()>;

    async fn get_secret_value(&self, request: &GetSecretValueRequest) -> Result<SecretInfo>;

    async fn close(&self) -> Result<()>;
}

struct ResolvedState {
    endpoints: Vec<Endpoint>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
}

#[derive(Debug)]
struct EndpointProgress {
    endpoint: String,
    attempts: u32,
    last_error: Option<RemoteError>,
}

type SharedProgress = Arc<Mutex<EndpointProgress>>;

fn record_failure(progress: &SharedProgress, error: RemoteError) {
    let mut progress = progress.lock().unwrap_or_else(|e| e.into_inner());
    progress.attempts += 1;
    progress.last_error = Some(error);
}

/// Multi-endpoint fetcher with retry, backoff and cross-endpoint racing
pub struct ResilientSecretFetcher {
    explicit_endpoints: Vec<Endpoint>,
    explicit_credentials: Option<Arc<dyn CredentialsProvider>>,
    properties_file: PathBuf,
    environment: Option<HashMap<String, String>>,
    request_waiting_time: Duration,
    backoff: Arc<dyn BackoffStrategy>,
    transport_factory: Arc<dyn TransportFactory>,
    latency_probe: Arc<dyn LatencyProbe>,
    state: OnceCell<ResolvedState>,
    transports: RwLock<HashMap<EndpointKey, Arc<dyn SecretTransport>>>,
    metrics: MetricsRecorder,
}

impl std::fmt::Debug for ResilientSecretFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientSecretFetcher")
            .field("explicit_endpoints", &self.explicit_endpoints)
            .field("properties_file", &self.properties_file)
            .field("request_waiting_time", &self.request_waiting_time)
            .field("initialized", &self.state.initialized())
            .finish()
    }
}

impl ResilientSecretFetcher {
    pub fn builder() -> ResilientSecretFetcherBuilder {
        ResilientSecretFetcherBuilder::default()
    }

    /// Endpoints in the order they are tried, once initialized
    pub fn endpoints(&self) -> Option<&[Endpoint]> {
        self.state.get().map(|state| state.endpoints.as_slice())
    }

    async fn state(&self) -> Result<&ResolvedState> {
        self.state.get_or_try_init(|| self.resolve()).await
    }

    async fn resolve(&self) -> Result<ResolvedState> {
        let file_properties = RawProperties::from_file(&self.properties_file)?;
        let env_properties = RawProperties::from_env(self.environment.as_ref())?;

        let mut candidates = self.explicit_endpoints.clone();
        if let Some(properties) = &file_properties {
            candidates.extend(properties.endpoints(PropertySource::Config)?);
        }
        candidates.extend(env_properties.endpoints(PropertySource::Env)?);

        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(candidates.len());
        for endpoint in candidates {
            endpoint.validate()?;
            if seen.insert(endpoint.key()) {
                endpoints.push(endpoint);
            }
        }
        if endpoints.is_empty() {
            return Err(Error::config("the param[regionInfo] is needed"));
        }

        let file_credentials = match &file_properties {
            Some(properties) => CredentialsConfig::from_properties(properties, PropertySource::Config)?,
            None => None,
        };
        let env_credentials = CredentialsConfig::from_properties(&env_properties, PropertySource::Env)?;
        // environment overrides the properties file, which overrides the builder
        let credentials = env_credentials
            .or(file_credentials)
            .map(CredentialsConfig::into_provider)
            .or_else(|| self.explicit_credentials.clone());

        if endpoints.len() > 1 {
            endpoints = sort_by_latency(endpoints, self.latency_probe.as_ref()).await;
        }

        for endpoint in &endpoints {
            self.transport(endpoint, credentials.clone())?;
        }

        log_client_config(
            endpoints.len(),
            credentials.as_ref().map(|c| c.kind()),
            self.request_waiting_time.as_millis(),
        );
        Ok(ResolvedState { endpoints, credentials })
    }

    /// Look up or lazily build the transport for an endpoint
    fn transport(
        &self,
        endpoint: &Endpoint,
        credentials: Option<Arc<dyn CredentialsProvider>>,
    ) -> Result<Arc<dyn SecretTransport>> {
        let key = endpoint.key();
        {
            let table = self.transports.read().unwrap_or_else(|e| e.into_inner());
            if let Some(transport) = table.get(&key) {
                return Ok(transport.clone());
            }
        }

        let mut table = self.transports.write().unwrap_or_else(|e| e.into_inner());
        if let Some(transport) = table.get(&key) {
            return Ok(transport.clone());
        }
        let transport = self.transport_factory.create(endpoint, credentials)?;
        debug!(endpoint = %key, "Created transport client");
        table.insert(key, transport.clone());
        Ok(transport)
    }

    async fn race(
        &self,
        state: &ResolvedState,
        request: &GetSecretValueRequest,
        primary_failure: RemoteError,
    ) -> Result<SecretInfo> {
        let stop = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let mut progress: Vec<SharedProgress> = Vec::with_capacity(state.endpoints.len());

        for (index, endpoint) in state.endpoints.iter().enumerate() {
            let entry = Arc::new(Mutex::new(EndpointProgress {
                endpoint: endpoint.key().to_string(),
                attempts: 0,
                last_error: None,
            }));
            if index == 0 {
                record_failure(&entry, primary_failure.clone());
            }
            progress.push(entry.clone());

            let transport = self.transport(endpoint, state.credentials.clone())?;
            let span = secret_span!("retry", request.secret_name, endpoint = %endpoint.key());
            tasks.spawn(
                retry_endpoint(
                    transport,
                    self.backoff.clone(),
                    request.clone(),
                    stop.clone(),
                    entry,
                    self.metrics.clone(),
                )
                .instrument(span),
            );
        }

        let deadline = tokio::time::sleep(self.request_waiting_time);
        tokio::pin!(deadline);

        let winner = loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break None,
                    Some(Ok(Some(response))) => break Some(response),
                    Some(Ok(None)) => continue,
                    Some(Err(e)) => {
                        warn!(secret_name = %request.secret_name, error = %e, "Retry task ended abnormally");
                        continue;
                    }
                },
                _ = &mut deadline => {
                    warn!(
                        secret_name = %request.secret_name,
                        waiting_ms = self.request_waiting_time.as_millis() as u64,
                        "Request waiting time elapsed before any endpoint answered"
                    );
                    break None;
                }
            }
        };

        // Outstanding calls finish on their own; sleeping retries observe the token
        stop.cancel();
        tasks.detach_all();

        if let Some(response) = winner {
            return Ok(response.into());
        }

        self.metrics.record_fetch_failure();
        let failures = progress
            .iter()
            .map(|entry| {
                let entry = entry.lock().unwrap_or_else(|e| e.into_inner());
                EndpointFailure {
                    endpoint: entry.endpoint.clone(),
                    attempts: entry.attempts,
                    error: entry.last_error.clone().unwrap_or_else(|| {
                        RemoteError::timeout("request waiting time elapsed before the endpoint answered")
                    }),
                }
            })
            .collect();
        Err(Error::AllEndpointsFailed { secret_name: request.secret_name.clone(), failures })
    }
}

async fn retry_endpoint(
    transport: Arc<dyn SecretTransport>,
    backoff: Arc<dyn BackoffStrategy>,
    request: GetSecretValueRequest,
    stop: CancellationToken,
    progress: SharedProgress,
    metrics: MetricsRecorder,
) -> Option<GetSecretValueResponse> {
    let endpoint = progress.lock().unwrap_or_else(|e| e.into_inner()).endpoint.clone();
    let mut attempt = 0u32;
    loop {
        let Some(wait) = backoff.wait(attempt) else {
            debug!(attempt, "Retry limit reached");
            return None;
        };

        tokio::select! {
            _ = stop.cancelled() => return None,
            _ = tokio::time::sleep(wait) => {}
        }

        match transport.get_secret_value(&request).await {
            Ok(response) => {
                metrics.record_remote_call(&endpoint, true);
                info!(attempt, "Endpoint answered during retry");
                return Some(response);
            }
            Err(error) => {
                metrics.record_remote_call(&endpoint, false);
                warn!(attempt, error = %error, "Retry attempt failed");
                let recoverable = error.kind.is_recoverable();
                record_failure(&progress, error);
                if !recoverable {
                    return None;
                }
                attempt += 1;
            }
        }
    }
}

#[async_trait]
impl SecretFetcher for ResilientSecretFetcher {
    async fn init(&self) -> Result<()> {
        self.state().await.map(|_| ())
    }

    async fn get_secret_value(&self, request: &GetSecretValueRequest) -> Result<SecretInfo> {
        let state = self.state().await?;
        let primary = &state.endpoints[0];
        let primary_key = primary.key().to_string();
        let transport = self.transport(primary, state.credentials.clone())?;

        let span = secret_span!("fetch", request.secret_name, endpoint = %primary_key);
        let first = transport.get_secret_value(request).instrument(span).await;
        let error = match first {
            Ok(response) => {
                self.metrics.record_remote_call(&primary_key, true);
                return Ok(response.into());
            }
            Err(error) => error,
        };
        self.metrics.record_remote_call(&primary_key, false);

        if !error.kind.is_recoverable() {
            warn!(
                secret_name = %request.secret_name,
                endpoint = %primary_key,
                error = %error,
                "GetSecretValue failed with a non-recoverable error"
            );
            return Err(Error::remote(&request.secret_name, primary_key, 1, error));
        }

        warn!(
            secret_name = %request.secret_name,
            endpoint = %primary_key,
            error = %error,
            "GetSecretValue failed, racing all endpoints"
        );
        self.race(state, request, error).await
    }

    async fn close(&self) -> Result<()> {
        self.transports.write().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}

/// Builder for [`ResilientSecretFetcher`]
#[derive(Default)]
pub struct ResilientSecretFetcherBuilder {
    endpoints: Vec<Endpoint>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    properties_file: Option<PathBuf>,
    environment: Option<HashMap<String, String>>,
    backoff: Option<Box<dyn BackoffStrategy>>,
    request_waiting_time: Option<Duration>,
    transport_factory: Option<Arc<dyn TransportFactory>>,
    latency_probe: Option<Arc<dyn LatencyProbe>>,
}

impl ResilientSecretFetcherBuilder {
    /// Add public endpoints for the given regions
    pub fn with_regions<I, S>(mut self, region_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints.extend(region_ids.into_iter().map(Endpoint::new));
        self
    }

    pub fn add_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_access_key(self, access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        self.with_credentials(CredentialsConfig::access_key(access_key_id, access_key_secret))
    }

    /// Credentials used when neither the properties file nor the environment declares any
    pub fn with_credentials(mut self, credentials: CredentialsConfig) -> Self {
        self.credentials = Some(credentials.into_provider());
        self
    }

    pub fn with_credentials_provider(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    /// Properties file to read; defaults to `secretsmanager.properties`
    pub fn with_properties_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.properties_file = Some(path.into());
        self
    }

    /// Read environment properties from this map instead of the process environment
    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_backoff_strategy(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.backoff = Some(Box::new(backoff));
        self
    }

    pub fn with_request_waiting_time(mut self, waiting_time: Duration) -> Self {
        self.request_waiting_time = Some(waiting_time);
        self
    }

    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    pub fn with_latency_probe(mut self, probe: Arc<dyn LatencyProbe>) -> Self {
        self.latency_probe = Some(probe);
        self
    }

    pub fn build(self) -> ResilientSecretFetcher {
        let mut backoff = self.backoff.unwrap_or_else(|| Box::new(ExponentialBackoff::default()));
        backoff.init();

        ResilientSecretFetcher {
            explicit_endpoints: self.endpoints,
            explicit_credentials: self.credentials,
            properties_file: self
                .properties_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROPERTIES_FILE)),
            environment: self.environment,
            request_waiting_time: self.request_waiting_time.unwrap_or(DEFAULT_REQUEST_WAITING_TIME),
            backoff: Arc::from(backoff),
            transport_factory: self.transport_factory.unwrap_or_else(|| Arc::new(HttpTransportFactory)),
            latency_probe: self.latency_probe.unwrap_or_else(|| Arc::new(PingProbe::default())),
            state: OnceCell::new(),
            transports: RwLock::new(HashMap::new()),
            metrics: MetricsRecorder::new(),
        }
    }
}
