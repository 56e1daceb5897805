//! Integration tests for the resilient fetcher
//!
//! Scripted transports stand in for remote endpoints so the race, retry and
//! deadline behavior can be driven on a paused clock. The last test goes
//! through the real signed HTTP transport against a wiremock server.

mod common;

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{NoProbe, Reply, ScriptedFactory, ScriptedTransport};
use secrets_cache_client::config::Endpoint;
use secrets_cache_client::credentials::CredentialsProvider;
use secrets_cache_client::secrets::{
    ExponentialBackoff, GetSecretValueRequest, SecretFetcher, SecretTransport, TransportFactory,
};
use secrets_cache_client::{Error, RemoteError, RemoteErrorKind, ResilientSecretFetcher, SecretCache};
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header_exists, method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NO_PROPERTIES: &str = "/nonexistent/secretsmanager.toml";

fn fetcher_for(factory: ScriptedFactory, regions: &[&str]) -> ResilientSecretFetcher {
    ResilientSecretFetcher::builder()
        .with_regions(regions.iter().copied())
        .with_properties_file(NO_PROPERTIES)
        .with_environment(HashMap::new())
        .with_backoff_strategy(ExponentialBackoff::new(3, Duration::from_millis(10), Duration::from_millis(40)))
        .with_transport_factory(Arc::new(factory))
        .with_latency_probe(Arc::new(NoProbe))
        .build()
}

fn request() -> GetSecretValueRequest {
    GetSecretValueRequest::new("db-pass", "ACSCurrent")
}

#[tokio::test(start_paused = true)]
async fn test_healthy_endpoint_wins_race_after_throttled_primary() {
    let primary = ScriptedTransport::new(vec![Reply::err(
        50,
        RemoteError::from_code("Rejected.Throttling", "slow down"),
    )]);
    let secondary = ScriptedTransport::new(vec![Reply::ok(100, "from-e2")]);
    let fetcher = fetcher_for(
        ScriptedFactory::new().with("e1", primary.clone()).with("e2", secondary.clone()),
        &["e1", "e2"],
    );

    let info = assert_ok!(fetcher.get_secret_value(&request()).await);
    assert_eq!(info.version_id, "from-e2");
    assert_eq!(info.secret_name, "db-pass");
    assert_eq!(secondary.calls(), 1);
    assert!(primary.calls() >= 2, "primary keeps retrying inside the race");
}

#[tokio::test(start_paused = true)]
async fn test_all_failing_endpoints_are_reported() {
    let e1 = ScriptedTransport::new(vec![Reply::err(50, RemoteError::from_code("Rejected.Throttling", "slow down"))]);
    let e2 = ScriptedTransport::new(vec![Reply::err(
        100,
        RemoteError::from_code("ServiceUnavailableTemporary", "maintenance"),
    )]);
    let fetcher = fetcher_for(ScriptedFactory::new().with("e1", e1).with("e2", e2), &["e1", "e2"]);

    let err = assert_err!(fetcher.get_secret_value(&request()).await);
    let message = err.to_string();
    assert!(message.contains("kms.e1.aliyuncs.com"), "{message}");
    assert!(message.contains("kms.e2.aliyuncs.com"), "{message}");

    match err {
        Error::AllEndpointsFailed { failures, .. } => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].error.kind, RemoteErrorKind::Throttling);
            assert_eq!(failures[1].error.kind, RemoteErrorKind::ServiceUnavailable);
            assert!(failures.iter().all(|f| f.attempts >= 4));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_non_recoverable_error_in_race_stops_that_endpoint_only() {
    let e1 = ScriptedTransport::new(vec![
        Reply::err(10, RemoteError::timeout("read timed out")),
        Reply::err(10, RemoteError::from_code("Forbidden.NoPermission", "denied")),
    ]);
    let e2 = ScriptedTransport::new(vec![
        Reply::err(10, RemoteError::connection("connection reset by peer")),
        Reply::ok(10, "from-e2"),
    ]);
    let fetcher = fetcher_for(ScriptedFactory::new().with("e1", e1.clone()).with("e2", e2), &["e1", "e2"]);

    let info = assert_ok!(fetcher.get_secret_value(&request()).await);
    assert_eq!(info.version_id, "from-e2");
    assert_eq!(e1.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_request_waiting_time_bounds_the_race() {
    let slow = ScriptedTransport::new(vec![
        Reply::err(10, RemoteError::timeout("read timed out")),
        Reply::ok(10_000, "too-late"),
    ]);
    let fetcher = ResilientSecretFetcher::builder()
        .with_regions(["e1"])
        .with_properties_file(NO_PROPERTIES)
        .with_environment(HashMap::new())
        .with_request_waiting_time(Duration::from_secs(1))
        .with_transport_factory(Arc::new(ScriptedFactory::new().with("e1", slow)))
        .with_latency_probe(Arc::new(NoProbe))
        .build();

    let started = tokio::time::Instant::now();
    let err = assert_err!(fetcher.get_secret_value(&request()).await);
    assert!(matches!(err, Error::AllEndpointsFailed { .. }));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_endpoints_and_credentials_from_properties_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("SecretName", "db-pass"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "RequestId": "req-1",
            "SecretName": "db-pass",
            "VersionId": "v7",
            "SecretData": "hunter2",
            "SecretDataType": "text",
            "ExtendedConfig": "{\"ttl\": 60000}",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"cache_client_region_id = '[{{"regionId":"local","endpoint":"{}"}}]'
credentials_type = "ak"
credentials_access_key_id = "test-id"
credentials_access_secret = "test-secret""#,
        server.uri()
    )
    .unwrap();

    let fetcher = ResilientSecretFetcher::builder()
        .with_properties_file(file.path())
        .with_environment(HashMap::new())
        .with_latency_probe(Arc::new(NoProbe))
        .build();
    let cache = SecretCache::builder().with_fetcher(Arc::new(fetcher)).build().await.unwrap();

    let value = cache.get_string_value("db-pass").await.unwrap();
    assert_eq!(value.expose_secret(), "hunter2");
    // second read is served from the cache
    cache.get_string_value("db-pass").await.unwrap();
    cache.close().await.unwrap();
}

/// Hands out one scripted transport and keeps the credentials it was given
struct RecordingFactory {
    transport: Arc<ScriptedTransport>,
    credentials: Mutex<Option<Arc<dyn CredentialsProvider>>>,
}

impl RecordingFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            transport: ScriptedTransport::new(vec![Reply::ok(0, "v1")]),
            credentials: Mutex::new(None),
        })
    }

    async fn access_key_id(&self) -> Option<String> {
        let provider = self.credentials.lock().unwrap().clone()?;
        Some(provider.credential().await.unwrap().access_key_id)
    }
}

impl TransportFactory for RecordingFactory {
    fn create(
        &self,
        _endpoint: &Endpoint,
        credentials: Option<Arc<dyn CredentialsProvider>>,
    ) -> secrets_cache_client::Result<Arc<dyn SecretTransport>> {
        *self.credentials.lock().unwrap() = credentials;
        Ok(self.transport.clone())
    }
}

fn ak_properties(access_key_id: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".properties").tempfile().unwrap();
    writeln!(
        file,
        "credentials_type=ak\ncredentials_access_key_id={access_key_id}\ncredentials_access_secret=secret"
    )
    .unwrap();
    file
}

async fn resolved_access_key_id(
    properties: &std::path::Path,
    environment: HashMap<String, String>,
) -> Option<String> {
    let factory = RecordingFactory::new();
    let fetcher = ResilientSecretFetcher::builder()
        .with_regions(["cn-hangzhou"])
        .with_access_key("explicit-id", "explicit-secret")
        .with_properties_file(properties)
        .with_environment(environment)
        .with_transport_factory(factory.clone())
        .with_latency_probe(Arc::new(NoProbe))
        .build();
    assert_ok!(fetcher.init().await);
    factory.access_key_id().await
}

#[tokio::test]
async fn test_credential_sources_override_in_load_order() {
    let file = ak_properties("file-id");
    let env: HashMap<String, String> = [
        ("credentials_type", "ak"),
        ("credentials_access_key_id", "env-id"),
        ("credentials_access_secret", "env-secret"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    // environment beats the properties file and the builder
    assert_eq!(resolved_access_key_id(file.path(), env).await.as_deref(), Some("env-id"));
    // properties file beats the builder
    assert_eq!(resolved_access_key_id(file.path(), HashMap::new()).await.as_deref(), Some("file-id"));
    // builder credentials apply when nothing else declares any
    assert_eq!(
        resolved_access_key_id(std::path::Path::new(NO_PROPERTIES), HashMap::new()).await.as_deref(),
        Some("explicit-id")
    );
}

#[tokio::test]
async fn test_missing_credentials_fail_initialization() {
    let fetcher = ResilientSecretFetcher::builder()
        .add_endpoint(Endpoint::new("cn-hangzhou"))
        .with_properties_file(NO_PROPERTIES)
        .with_environment(HashMap::new())
        .build();

    let err = assert_err!(fetcher.init().await);
    assert!(err.is_fatal_for_init());
}
