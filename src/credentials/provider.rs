//! Credential providers.
//!
//! Temporary credentials (RAM role, OIDC role) are cached and refreshed a few
//! minutes before they expire.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::{RemoteError, RemoteErrorKind};
use crate::secrets::SecretString;

/// Instance metadata service reachable from ECS hosts
pub const ECS_METADATA_ENDPOINT: &str = "http://100.100.100.200";
pub const DEFAULT_STS_ENDPOINT: &str = "sts.aliyuncs.com";
const DEFAULT_OIDC_DURATION_SECONDS: u32 = 3600;
const REFRESH_MARGIN_SECONDS: i64 = 180;
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Access key material used to sign a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyCredential {
    pub access_key_id: String,
    pub access_key_secret: SecretString,
    pub security_token: Option<SecretString>,
    /// When temporary material stops being valid
    pub expiration: Option<DateTime<Utc>>,
}

impl AccessKeyCredential {
    fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            None => true,
            Some(expiration) => (expiration - now).num_seconds() > REFRESH_MARGIN_SECONDS,
        }
    }
}

/// Yields the credential to sign the next request with
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credential(&self) -> Result<AccessKeyCredential, RemoteError>;

    /// Short name used in logs
    fn kind(&self) -> &'static str;
}

/// A fixed access key pair
#[derive(Debug, Clone)]
pub struct StaticCredentialsProvider {
    credential: AccessKeyCredential,
}

impl StaticCredentialsProvider {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<SecretString>) -> Self {
        Self {
            credential: AccessKeyCredential {
                access_key_id: access_key_id.into(),
                access_key_secret: access_key_secret.into(),
                security_token: None,
                expiration: None,
            },
        }
    }

    pub fn with_security_token(mut self, token: impl Into<SecretString>) -> Self {
        self.credential.security_token = Some(token.into());
        self
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn credential(&self) -> Result<AccessKeyCredential, RemoteError> {
        Ok(self.credential.clone())
    }

    fn kind(&self) -> &'static str {
        "ak"
    }
}

fn provider_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn parse_expiration(raw: &str) -> Result<DateTime<Utc>, RemoteError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            RemoteError::new(RemoteErrorKind::Other, format!("invalid credential expiration '{}': {}", raw, e))
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemporaryCredentialBody {
    access_key_id: String,
    access_key_secret: SecretString,
    security_token: SecretString,
    expiration: String,
}

impl TemporaryCredentialBody {
    fn into_credential(self) -> Result<AccessKeyCredential, RemoteError> {
        Ok(AccessKeyCredential {
            expiration: Some(parse_expiration(&self.expiration)?),
            access_key_id: self.access_key_id,
            access_key_secret: self.access_key_secret,
            security_token: Some(self.security_token),
        })
    }
}

/// Credentials of the RAM role attached to the host.
#[derive(Debug)]
pub struct EcsRamRoleProvider {
    role_name: String,
    metadata_endpoint: String,
    client: reqwest::Client,
    cached: Mutex<Option<AccessKeyCredential>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetadataResponse {
    code: Option<String>,
    access_key_id: Option<String>,
    access_key_secret: Option<SecretString>,
    security_token: Option<SecretString>,
    expiration: Option<String>,
}

impl MetadataResponse {
    fn into_body(self) -> Option<TemporaryCredentialBody> {
        Some(TemporaryCredentialBody {
            access_key_id: self.access_key_id?,
            access_key_secret: self.access_key_secret?,
            security_token: self.security_token?,
            expiration: self.expiration?,
        })
    }
}

impl EcsRamRoleProvider {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            metadata_endpoint: ECS_METADATA_ENDPOINT.to_string(),
            client: provider_client(),
            cached: Mutex::new(None),
        }
    }

    /// Point the provider at a different metadata service
    pub fn with_metadata_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.metadata_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    async fn fetch(&self) -> Result<AccessKeyCredential, RemoteError> {
        let url = format!(
            "{}/latest/meta-data/ram/security-credentials/{}",
            self.metadata_endpoint,
            urlencoding::encode(&self.role_name)
        );
        let response = self.client.get(&url).send().await.map_err(RemoteError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::new(
                RemoteErrorKind::Unauthorized,
                format!("metadata service returned {} for role '{}'", status, self.role_name),
            )
            .with_status(status.as_u16()));
        }

        let parsed: MetadataResponse = response.json().await.map_err(RemoteError::from)?;
        let code = parsed.code.clone();
        match (code.as_deref(), parsed.into_body()) {
            (Some("Success") | None, Some(body)) => body.into_credential(),
            (code, _) => Err(RemoteError::new(
                RemoteErrorKind::Unauthorized,
                format!(
                    "metadata service refused role '{}' (code {})",
                    self.role_name,
                    code.unwrap_or("missing")
                ),
            )),
        }
    }
}

#[async_trait]
impl CredentialsProvider for EcsRamRoleProvider {
    async fn credential(&self) -> Result<AccessKeyCredential, RemoteError> {
        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref() {
            if credential.is_usable_at(Utc::now()) {
                return Ok(credential.clone());
            }
        }

        debug!(role_name = %self.role_name, "Refreshing RAM role credentials from instance metadata");
        match self.fetch().await {
            Ok(credential) => {
                *cached = Some(credential.clone());
                Ok(credential)
            }
            Err(e) => {
                warn!(role_name = %self.role_name, error = %e, "Failed to refresh RAM role credentials");
                Err(e)
            }
        }
    }

    fn kind(&self) -> &'static str {
        "ecs_ram_role"
    }
}

/// Credentials from assuming a role with an OIDC token.
#[derive(Debug)]
pub struct OidcRoleProvider {
    role_arn: String,
    oidc_provider_arn: String,
    oidc_token_file_path: PathBuf,
    role_session_name: String,
    policy: Option<String>,
    sts_endpoint: String,
    duration_seconds: u32,
    client: reqwest::Client,
    cached: Mutex<Option<AccessKeyCredential>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StsResponse {
    request_id: Option<String>,
    credentials: Option<TemporaryCredentialBody>,
    code: Option<String>,
    message: Option<String>,
}

impl OidcRoleProvider {
    pub fn new(
        role_arn: impl Into<String>,
        oidc_provider_arn: impl Into<String>,
        oidc_token_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            role_arn: role_arn.into(),
            oidc_provider_arn: oidc_provider_arn.into(),
            oidc_token_file_path: oidc_token_file_path.into(),
            role_session_name: format!("secrets-cache-client-{}", Utc::now().timestamp_millis()),
            policy: None,
            sts_endpoint: DEFAULT_STS_ENDPOINT.to_string(),
            duration_seconds: DEFAULT_OIDC_DURATION_SECONDS,
            client: provider_client(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_role_session_name(mut self, name: impl Into<String>) -> Self {
        self.role_session_name = name.into();
        self
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    pub fn with_sts_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sts_endpoint = endpoint.into();
        self
    }

    pub fn with_duration_seconds(mut self, seconds: u32) -> Self {
        self.duration_seconds = seconds;
        self
    }

    fn sts_url(&self) -> String {
        if self.sts_endpoint.starts_with("http://") || self.sts_endpoint.starts_with("https://") {
            self.sts_endpoint.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.sts_endpoint)
        }
    }

    async fn fetch(&self) -> Result<AccessKeyCredential, RemoteError> {
        let token = tokio::fs::read_to_string(&self.oidc_token_file_path).await.map_err(|e| {
            RemoteError::new(
                RemoteErrorKind::Unauthorized,
                format!(
                    "failed to read OIDC token file {}: {}",
                    self.oidc_token_file_path.display(),
                    e
                ),
            )
        })?;

        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let duration = self.duration_seconds.to_string();
        let mut form = vec![
            ("RoleArn", self.role_arn.as_str()),
            ("OIDCProviderArn", self.oidc_provider_arn.as_str()),
            ("OIDCToken", token.trim()),
            ("RoleSessionName", self.role_session_name.as_str()),
            ("DurationSeconds", duration.as_str()),
        ];
        if let Some(policy) = &self.policy {
            form.push(("Policy", policy.as_str()));
        }

        let response = self
            .client
            .post(self.sts_url())
            .query(&[
                ("Action", "AssumeRoleWithOIDC"),
                ("Format", "JSON"),
                ("Version", "2015-04-01"),
                ("Timestamp", timestamp.as_str()),
            ])
            .form(&form)
            .send()
            .await
            .map_err(RemoteError::from)?;
        let status = response.status();
        let parsed: StsResponse = response.json().await.map_err(RemoteError::from)?;

        match parsed.credentials {
            Some(body) if status.is_success() => body.into_credential(),
            _ => {
                let code = parsed.code.unwrap_or_else(|| "AssumeRoleWithOIDC.Failed".to_string());
                let mut error = RemoteError::from_code(
                    code,
                    parsed.message.unwrap_or_else(|| format!("STS returned {}", status)),
                )
                .with_status(status.as_u16());
                if let Some(request_id) = parsed.request_id {
                    error = error.with_request_id(request_id);
                }
                Err(error)
            }
        }
    }
}

#[async_trait]
impl CredentialsProvider for OidcRoleProvider {
    async fn credential(&self) -> Result<AccessKeyCredential, RemoteError> {
        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref() {
            if credential.is_usable_at(Utc::now()) {
                return Ok(credential.clone());
            }
        }

        debug!(role_arn = %self.role_arn, "Assuming role with OIDC token");
        let credential = self.fetch().await.inspect_err(|e| {
            warn!(role_arn = %self.role_arn, error = %e, "Failed to assume role with OIDC token");
        })?;
        *cached = Some(credential.clone());
        Ok(credential)
    }

    fn kind(&self) -> &'static str {
        "oidc_role_arn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn expiry_in(seconds: i64) -> String {
        (Utc::now() + chrono::Duration::seconds(seconds)).format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticCredentialsProvider::new("id", "secret").with_security_token("token");
        let credential = provider.credential().await.unwrap();
        assert_eq!(credential.access_key_id, "id");
        assert_eq!(credential.access_key_secret.expose_secret(), "secret");
        assert!(credential.security_token.is_some());
        assert_eq!(provider.kind(), "ak");
    }

    #[test]
    fn test_refresh_margin() {
        let now = Utc::now();
        let mut credential = AccessKeyCredential {
            access_key_id: "id".to_string(),
            access_key_secret: SecretString::new("s"),
            security_token: None,
            expiration: Some(now + chrono::Duration::seconds(600)),
        };
        assert!(credential.is_usable_at(now));
        credential.expiration = Some(now + chrono::Duration::seconds(60));
        assert!(!credential.is_usable_at(now));
        credential.expiration = None;
        assert!(credential.is_usable_at(now));
    }

    #[tokio::test]
    async fn test_ecs_ram_role_caches_until_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/latest/meta-data/ram/security-credentials/reader"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Code": "Success",
                "AccessKeyId": "STS.id",
                "AccessKeySecret": "sts-secret",
                "SecurityToken": "sts-token",
                "Expiration": expiry_in(3600),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = EcsRamRoleProvider::new("reader").with_metadata_endpoint(server.uri());
        let first = provider.credential().await.unwrap();
        let second = provider.credential().await.unwrap();
        assert_eq!(first.access_key_id, "STS.id");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_ecs_ram_role_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = EcsRamRoleProvider::new("missing").with_metadata_endpoint(server.uri());
        let err = provider.credential().await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Unauthorized);
        assert_eq!(err.status, Some(404));
    }

    #[tokio::test]
    async fn test_oidc_assume_role() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("Action", "AssumeRoleWithOIDC"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "RequestId": "req-1",
                "Credentials": {
                    "AccessKeyId": "STS.oidc",
                    "AccessKeySecret": "oidc-secret",
                    "SecurityToken": "oidc-token",
                    "Expiration": expiry_in(3600),
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "eyJhbGciOi...\n").unwrap();

        let provider = OidcRoleProvider::new("acs:ram::1:role/r", "acs:ram::1:oidc-provider/p", &token_path)
            .with_sts_endpoint(server.uri())
            .with_role_session_name("test-session");
        let credential = provider.credential().await.unwrap();
        assert_eq!(credential.access_key_id, "STS.oidc");
        provider.credential().await.unwrap();
    }

    #[tokio::test]
    async fn test_oidc_error_code_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "RequestId": "req-2",
                "Code": "InvalidParameter.OIDCToken",
                "Message": "token expired",
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "expired").unwrap();

        let provider = OidcRoleProvider::new("arn", "provider", &token_path).with_sts_endpoint(server.uri());
        let err = provider.credential().await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::BadRequest);
        assert_eq!(err.request_id.as_deref(), Some("req-2"));
    }

    #[tokio::test]
    async fn test_oidc_missing_token_file() {
        let provider = OidcRoleProvider::new("arn", "provider", "/nonexistent/token");
        let err = provider.credential().await.unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Unauthorized);
    }
}
