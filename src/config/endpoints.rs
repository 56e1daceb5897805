//! Service endpoint descriptions.
//!
//! An endpoint is identified by its resolved host plus region id. Two
//! endpoints that resolve to the same pair share one transport client.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

use super::PropertySource;
use crate::errors::{Error, Result};

/// Host suffix of dedicated instance gateways; these need a CA bundle
pub const INSTANCE_GATEWAY_DOMAIN_SUFFIX: &str = "cryptoservice.kms.aliyuncs.com";

/// How the process reaches the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkMode {
    #[default]
    Public,
    /// Inside a VPC, using the private endpoint
    Private,
}

/// A candidate service endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    region_id: String,
    network_mode: NetworkMode,
    host: Option<String>,
    ca_file_path: Option<PathBuf>,
}

/// Stable identity of an endpoint for map lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub host: String,
    pub region_id: String,
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.host, self.region_id)
    }
}

impl Endpoint {
    pub fn new(region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            network_mode: NetworkMode::Public,
            host: None,
            ca_file_path: None,
        }
    }

    pub fn with_network_mode(mut self, network_mode: NetworkMode) -> Self {
        self.network_mode = network_mode;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.host = if host.trim().is_empty() { None } else { Some(host) };
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file_path = Some(path.into());
        self
    }

    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.network_mode
    }

    pub fn ca_file_path(&self) -> Option<&PathBuf> {
        self.ca_file_path.as_ref()
    }

    /// Host the transport connects to, without scheme
    pub fn resolved_host(&self) -> String {
        match &self.host {
            Some(host) => host
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
            None => match self.network_mode {
                NetworkMode::Public => format!("kms.{}.aliyuncs.com", self.region_id),
                NetworkMode::Private => format!("kms-vpc.{}.aliyuncs.com", self.region_id),
            },
        }
    }

    /// Base URL for requests; explicit `http://` hosts are kept for local testing
    pub fn base_url(&self) -> String {
        match &self.host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                host.trim_end_matches('/').to_string()
            }
            _ => format!("https://{}", self.resolved_host()),
        }
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey { host: self.resolved_host(), region_id: self.region_id.clone() }
    }

    pub fn is_instance_gateway(&self) -> bool {
        self.resolved_host().ends_with(INSTANCE_GATEWAY_DOMAIN_SUFFIX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.region_id.trim().is_empty() {
            return Err(Error::config("endpoint region id must not be empty"));
        }
        if self.is_instance_gateway() && self.ca_file_path.is_none() {
            return Err(Error::config(format!(
                "endpoint {} is an instance gateway and requires a CA file path",
                self.resolved_host()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// One entry of the `cache_client_region_id` list
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EndpointSpec {
    #[serde(rename = "regionId", alias = "region_id")]
    pub region_id: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_flexible_bool")]
    pub vpc: bool,
    #[serde(default, rename = "caFilePath", alias = "ca_file_path")]
    pub ca_file_path: Option<String>,
}

impl From<EndpointSpec> for Endpoint {
    fn from(spec: EndpointSpec) -> Self {
        let mut endpoint = Endpoint::new(spec.region_id).with_network_mode(if spec.vpc {
            NetworkMode::Private
        } else {
            NetworkMode::Public
        });
        if let Some(host) = spec.endpoint {
            endpoint = endpoint.with_host(host);
        }
        if let Some(path) = spec.ca_file_path.filter(|p| !p.trim().is_empty()) {
            endpoint = endpoint.with_ca_file(path);
        }
        endpoint
    }
}

fn deserialize_flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Text(String),
    }

    match Option::<Flexible>::deserialize(deserializer)? {
        None => Ok(false),
        Some(Flexible::Bool(value)) => Ok(value),
        Some(Flexible::Text(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "0" => Ok(false),
            "true" | "1" => Ok(true),
            other => Err(serde::de::Error::custom(format!("invalid vpc flag '{}'", other))),
        },
    }
}

/// Parse the JSON form of the `cache_client_region_id` property
pub fn parse_endpoint_list(raw: &str, source: PropertySource) -> Result<Vec<Endpoint>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let specs: Vec<EndpointSpec> = serde_json::from_str(raw)
        .map_err(|_| Error::config(source.illegal_param(super::CACHE_CLIENT_REGION_ID)))?;
    endpoints_from_specs(specs, source)
}

pub(crate) fn endpoints_from_specs(
    specs: Vec<EndpointSpec>,
    source: PropertySource,
) -> Result<Vec<Endpoint>> {
    specs
        .into_iter()
        .map(|spec| {
            if spec.region_id.trim().is_empty() {
                return Err(Error::config(source.missing_param("regionId")));
            }
            let endpoint = Endpoint::from(spec);
            endpoint.validate()?;
            Ok(endpoint)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hosts() {
        let public = Endpoint::new("cn-hangzhou");
        assert_eq!(public.resolved_host(), "kms.cn-hangzhou.aliyuncs.com");
        assert_eq!(public.base_url(), "https://kms.cn-hangzhou.aliyuncs.com");

        let private = Endpoint::new("cn-hangzhou").with_network_mode(NetworkMode::Private);
        assert_eq!(private.resolved_host(), "kms-vpc.cn-hangzhou.aliyuncs.com");
    }

    #[test]
    fn test_explicit_host_wins() {
        let endpoint = Endpoint::new("cn-shanghai")
            .with_network_mode(NetworkMode::Private)
            .with_host("https://custom.example.com/");
        assert_eq!(endpoint.resolved_host(), "custom.example.com");
        assert_eq!(endpoint.base_url(), "https://custom.example.com");

        let local = Endpoint::new("local").with_host("http://127.0.0.1:8080");
        assert_eq!(local.base_url(), "http://127.0.0.1:8080");
        assert_eq!(local.resolved_host(), "127.0.0.1:8080");
    }

    #[test]
    fn test_key_uses_host_and_region() {
        let a = Endpoint::new("cn-hangzhou");
        let b = Endpoint::new("cn-hangzhou").with_host("kms.cn-hangzhou.aliyuncs.com");
        let c = Endpoint::new("cn-beijing").with_host("kms.cn-hangzhou.aliyuncs.com");
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.key().to_string(), "kms.cn-hangzhou.aliyuncs.com(cn-hangzhou)");
    }

    #[test]
    fn test_instance_gateway_requires_ca() {
        let gateway = Endpoint::new("cn-hangzhou").with_host("kst-abc.cryptoservice.kms.aliyuncs.com");
        assert!(gateway.is_instance_gateway());
        assert!(gateway.validate().is_err());
        assert!(gateway.with_ca_file("/etc/kms/ca.pem").validate().is_ok());
    }

    #[test]
    fn test_parse_endpoint_list() {
        let raw = r#"[
            {"regionId": "cn-hangzhou"},
            {"regionId": "cn-shanghai", "vpc": true},
            {"regionId": "cn-beijing", "vpc": "true", "endpoint": "kms.example.com", "caFilePath": ""}
        ]"#;
        let endpoints = parse_endpoint_list(raw, PropertySource::Env).unwrap();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(endpoints[0].network_mode(), NetworkMode::Public);
        assert_eq!(endpoints[1].network_mode(), NetworkMode::Private);
        assert_eq!(endpoints[2].resolved_host(), "kms.example.com");
        assert!(endpoints[2].ca_file_path().is_none());
    }

    #[test]
    fn test_parse_endpoint_list_rejects_garbage() {
        let err = parse_endpoint_list("cn-hangzhou", PropertySource::Env).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: env credentials param[cache_client_region_id] is illegal"
        );
    }

    #[test]
    fn test_parse_endpoint_list_requires_region() {
        let err = parse_endpoint_list(r#"[{"regionId": ""}]"#, PropertySource::Config).unwrap_err();
        assert!(err.to_string().contains("config credentials missing required parameters[regionId]"));
    }

    #[test]
    fn test_empty_list_is_empty() {
        assert!(parse_endpoint_list("  ", PropertySource::Env).unwrap().is_empty());
        assert!(parse_endpoint_list("[]", PropertySource::Env).unwrap().is_empty());
    }
}
