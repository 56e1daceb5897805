//! Wire transport for the `GetSecretValue` call.
//!
//! [`HttpSecretTransport`] speaks the service's RPC-over-HTTPS protocol and
//! signs every request with ACS3-HMAC-SHA256. Tests and embedders can plug a
//! different [`TransportFactory`] into the fetcher.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::Endpoint;
use crate::credentials::{AccessKeyCredential, CredentialsProvider};
use crate::errors::{Error, RemoteError, RemoteErrorKind, Result};
use crate::secrets::types::{SecretDataType, SecretInfo, SecretString};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_ALGORITHM: &str = "ACS3-HMAC-SHA256";
const API_VERSION: &str = "2016-01-20";
const ACTION_GET_SECRET_VALUE: &str = "GetSecretValue";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// User agent sent with every request
pub fn user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Parameters of one `GetSecretValue` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetSecretValueRequest {
    pub secret_name: String,
    pub version_stage: String,
    pub fetch_extended_config: bool,
}

impl GetSecretValueRequest {
    pub fn new(secret_name: impl Into<String>, version_stage: impl Into<String>) -> Self {
        Self {
            secret_name: secret_name.into(),
            version_stage: version_stage.into(),
            fetch_extended_config: true,
        }
    }

    fn query(&self) -> BTreeMap<String, String> {
        let mut query = BTreeMap::new();
        query.insert("SecretName".to_string(), self.secret_name.clone());
        if !self.version_stage.is_empty() {
            query.insert("VersionStage".to_string(), self.version_stage.clone());
        }
        query.insert("FetchExtendedConfig".to_string(), self.fetch_extended_config.to_string());
        query
    }
}

/// Successful `GetSecretValue` response body
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct GetSecretValueResponse {
    pub request_id: Option<String>,
    pub secret_name: String,
    pub version_id: String,
    pub secret_data: SecretString,
    pub secret_data_type: Option<String>,
    pub create_time: Option<String>,
    pub secret_type: Option<String>,
    pub automatic_rotation: Option<String>,
    pub extended_config: Option<String>,
    pub rotation_interval: Option<String>,
    pub next_rotation_date: Option<String>,
}

impl From<GetSecretValueResponse> for SecretInfo {
    fn from(response: GetSecretValueResponse) -> Self {
        SecretInfo {
            secret_name: response.secret_name,
            version_id: response.version_id,
            secret_value: response.secret_data,
            secret_data_type: response
                .secret_data_type
                .as_deref()
                .map(SecretDataType::from)
                .unwrap_or_default(),
            create_time: response.create_time,
            secret_type: response.secret_type,
            automatic_rotation: response.automatic_rotation,
            extended_config: response.extended_config,
            rotation_interval: response.rotation_interval,
            next_rotation_date: response.next_rotation_date,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceErrorBody {
    request_id: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

/// One client bound to one endpoint
#[async_trait]
pub trait SecretTransport: Send + Sync {
    async fn get_secret_value(
        &self,
        request: &GetSecretValueRequest,
    ) -> std::result::Result<GetSecretValueResponse, RemoteError>;
}

/// Builds transport clients per endpoint
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        endpoint: &Endpoint,
        credentials: Option<Arc<dyn CredentialsProvider>>,
    ) -> Result<Arc<dyn SecretTransport>>;
}

/// Default factory producing signed HTTPS clients. Fails with `Error::Config`
/// when no credentials were resolved.
#[derive(Debug, Clone, Default)]
pub struct HttpTransportFactory;

impl TransportFactory for HttpTransportFactory {
    fn create(
        &self,
        endpoint: &Endpoint,
        credentials: Option<Arc<dyn CredentialsProvider>>,
    ) -> Result<Arc<dyn SecretTransport>> {
        let credentials = credentials.ok_or_else(|| {
            Error::config(format!("no credentials configured for endpoint {}", endpoint.key()))
        })?;
        Ok(Arc::new(HttpSecretTransport::new(endpoint, credentials)?))
    }
}

/// Signed HTTPS client for one endpoint
pub struct HttpSecretTransport {
    base_url: String,
    host: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialsProvider>,
    user_agent: String,
}

impl HttpSecretTransport {
    pub fn new(endpoint: &Endpoint, credentials: Arc<dyn CredentialsProvider>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);

        if let Some(ca_path) = endpoint.ca_file_path() {
            let pem = std::fs::read(ca_path).map_err(|e| {
                Error::config_with_source(
                    format!("failed to read CA file {} for {}", ca_path.display(), endpoint.key()),
                    Box::new(e),
                )
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                Error::config_with_source(
                    format!("invalid CA certificate in {}", ca_path.display()),
                    Box::new(e),
                )
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder.build().map_err(|e| {
            Error::config_with_source(
                format!("failed to build HTTP client for {}", endpoint.key()),
                Box::new(e),
            )
        })?;

        Ok(Self {
            base_url: endpoint.base_url(),
            host: endpoint.resolved_host(),
            client,
            credentials,
            user_agent: user_agent(),
        })
    }

    fn signed_headers(
        &self,
        credential: &AccessKeyCredential,
        query: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let payload_hash = hex::encode(Sha256::digest(b""));
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.host.clone());
        headers.insert("x-acs-action".to_string(), ACTION_GET_SECRET_VALUE.to_string());
        headers.insert("x-acs-version".to_string(), API_VERSION.to_string());
        headers.insert(
            "x-acs-date".to_string(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        headers.insert("x-acs-signature-nonce".to_string(), uuid::Uuid::new_v4().to_string());
        headers.insert("x-acs-content-sha256".to_string(), payload_hash.clone());
        if let Some(token) = &credential.security_token {
            headers.insert("x-acs-security-token".to_string(), token.expose_secret().to_string());
        }

        let signature = sign_request(
            "POST",
            "/",
            query,
            &headers,
            &payload_hash,
            credential.access_key_secret.expose_secret(),
        );
        headers.insert(
            "authorization".to_string(),
            format!(
                "{} Credential={},SignedHeaders={},Signature={}",
                SIGNATURE_ALGORITHM,
                credential.access_key_id,
                signature.signed_headers,
                signature.signature
            ),
        );
        headers
    }
}

#[async_trait]
impl SecretTransport for HttpSecretTransport {
    async fn get_secret_value(
        &self,
        request: &GetSecretValueRequest,
    ) -> std::result::Result<GetSecretValueResponse, RemoteError> {
        let credential = self.credentials.credential().await?;
        let query = request.query();
        let headers = self.signed_headers(&credential, &query);

        let mut builder = self
            .client
            .post(format!("{}/?{}", self.base_url, canonical_query(&query)))
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::ACCEPT, "application/json");
        for (name, value) in &headers {
            if name != "host" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let response = builder.send().await.map_err(RemoteError::from)?;
        let status = response.status();
        let body = response.text().await.map_err(RemoteError::from)?;

        if status.is_success() {
            return serde_json::from_str::<GetSecretValueResponse>(&body).map_err(|e| {
                RemoteError::new(RemoteErrorKind::Other, format!("malformed GetSecretValue response: {}", e))
                    .with_status(status.as_u16())
            });
        }

        debug!(host = %self.host, status = status.as_u16(), "GetSecretValue returned an error status");
        Err(service_error(status.as_u16(), &body))
    }
}

fn service_error(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<ServiceErrorBody>(body) {
        Ok(ServiceErrorBody { code: Some(code), message, request_id }) => {
            let error = RemoteError::from_code(code, message.unwrap_or_default()).with_status(status);
            match request_id {
                Some(request_id) => error.with_request_id(request_id),
                None => error,
            }
        }
        _ => {
            let kind = match status {
                429 => RemoteErrorKind::Throttling,
                500 => RemoteErrorKind::InternalFailure,
                502..=504 => RemoteErrorKind::ServiceUnavailable,
                401 | 403 => RemoteErrorKind::Unauthorized,
                404 => RemoteErrorKind::NotFound,
                _ => RemoteErrorKind::Other,
            };
            RemoteError::new(kind, format!("HTTP {}", status)).with_status(status)
        }
    }
}

pub(crate) struct Signature {
    pub signed_headers: String,
    pub signature: String,
}

fn canonical_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute an ACS3-HMAC-SHA256 signature. Header names must be lowercase.
pub(crate) fn sign_request(
    method: &str,
    canonical_uri: &str,
    query: &BTreeMap<String, String>,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
    access_key_secret: &str,
) -> Signature {
    let signed: Vec<(&String, &String)> = headers
        .iter()
        .filter(|(name, _)| {
            name.as_str() == "host" || name.as_str() == "content-type" || name.starts_with("x-acs-")
        })
        .collect();

    let canonical_headers: String =
        signed.iter().map(|(name, value)| format!("{}:{}\n", name, value.trim())).collect();
    let signed_headers =
        signed.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        canonical_uri,
        canonical_query(query),
        canonical_headers,
        signed_headers,
        payload_hash
    );
    let string_to_sign = format!(
        "{}\n{}",
        SIGNATURE_ALGORITHM,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let mut mac = match HmacSha256::new_from_slice(access_key_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    };
    mac.update(string_to_sign.as_bytes());

    Signature { signed_headers, signature: hex::encode(mac.finalize().into_bytes()) }
}
