//! # Configuration Management
//!
//! Loads client properties from an optional properties file and from the
//! environment (the process environment, or an explicit map for embedding and
//! tests) using the `config` crate.
//!
//! Files named `*.properties` or `*.ini` hold plain `key=value` lines; any
//! other name is read as TOML. Both sources share the same keys:
//!
//! ```text
//! cache_client_region_id=[{"regionId":"cn-hangzhou"}]
//! credentials_type=ak
//! credentials_access_key_id=LTAI...
//! credentials_access_secret=...
//! ```

pub mod endpoints;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::errors::{Error, Result};
use endpoints::{endpoints_from_specs, parse_endpoint_list, EndpointSpec};

pub use endpoints::{Endpoint, EndpointKey, NetworkMode};

/// Properties file looked up when no other name is configured
pub const DEFAULT_PROPERTIES_FILE: &str = "secretsmanager.properties";

pub const CACHE_CLIENT_REGION_ID: &str = "cache_client_region_id";
pub const CREDENTIALS_TYPE: &str = "credentials_type";
pub const CREDENTIALS_ACCESS_KEY_ID: &str = "credentials_access_key_id";
pub const CREDENTIALS_ACCESS_SECRET: &str = "credentials_access_secret";
pub const CREDENTIALS_ROLE_NAME: &str = "credentials_role_name";
pub const CREDENTIALS_ROLE_ARN: &str = "credentials_role_arn";
pub const CREDENTIALS_OIDC_PROVIDER_ARN: &str = "credentials_oidc_provider_arn";
pub const CREDENTIALS_OIDC_TOKEN_FILE_PATH: &str = "credentials_oidc_token_file_path";
pub const CREDENTIALS_ROLE_SESSION_NAME: &str = "credentials_role_session_name";
pub const CREDENTIALS_POLICY: &str = "credentials_policy";
pub const CREDENTIALS_STS_ENDPOINT: &str = "credentials_sts_endpoint";
pub const CREDENTIALS_DURATION_SECONDS: &str = "credentials_duration_seconds";

/// Where a set of properties came from; used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySource {
    Config,
    Env,
}

impl PropertySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertySource::Config => "config",
            PropertySource::Env => "env",
        }
    }

    pub fn missing_param(&self, key: &str) -> String {
        format!("{} credentials missing required parameters[{}]", self.as_str(), key)
    }

    pub fn illegal_param(&self, key: &str) -> String {
        format!("{} credentials param[{}] is illegal", self.as_str(), key)
    }
}

impl fmt::Display for PropertySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Region list as either a JSON string or an inline TOML array
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RegionList {
    Json(String),
    Inline(Vec<EndpointSpec>),
}

/// Unvalidated client properties as read from one source
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RawProperties {
    #[serde(default)]
    pub cache_client_region_id: Option<RegionList>,
    #[serde(default)]
    pub credentials_type: Option<String>,
    #[serde(default)]
    pub credentials_access_key_id: Option<String>,
    #[serde(default)]
    pub credentials_access_secret: Option<String>,
    #[serde(default)]
    pub credentials_role_name: Option<String>,
    #[serde(default)]
    pub credentials_role_arn: Option<String>,
    #[serde(default)]
    pub credentials_oidc_provider_arn: Option<String>,
    #[serde(default)]
    pub credentials_oidc_token_file_path: Option<String>,
    #[serde(default)]
    pub credentials_role_session_name: Option<String>,
    #[serde(default)]
    pub credentials_policy: Option<String>,
    #[serde(default)]
    pub credentials_sts_endpoint: Option<String>,
    #[serde(default)]
    pub credentials_duration_seconds: Option<String>,
}

impl RawProperties {
    /// Load properties from a `key=value` or TOML file. A missing file yields `None`.
    pub fn from_file(path: &Path) -> Result<Option<Self>> {
        if !path.is_file() {
            return Ok(None);
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::new(&path.to_string_lossy(), file_format(path)).required(true),
            )
            .build()?;
        let properties: RawProperties = settings.try_deserialize()?;

        tracing::debug!(path = %path.display(), "Loaded secrets client properties file");
        Ok(Some(properties))
    }

    /// Load properties from the environment, or from `overrides` when supplied
    pub fn from_env(overrides: Option<&HashMap<String, String>>) -> Result<Self> {
        let mut environment = config::Environment::default();
        if let Some(map) = overrides {
            let map: config::Map<String, String> =
                map.iter().map(|(k, v)| (k.to_lowercase(), v.clone())).collect();
            environment = environment.source(Some(map));
        }

        let settings = config::Config::builder().add_source(environment).build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Non-empty value of a string property
    pub fn value(field: &Option<String>) -> Option<&str> {
        field.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn has_any(&self) -> bool {
        *self != RawProperties::default()
    }

    /// Endpoints declared by this source, in declaration order
    pub fn endpoints(&self, source: PropertySource) -> Result<Vec<Endpoint>> {
        match &self.cache_client_region_id {
            None => Ok(Vec::new()),
            Some(RegionList::Json(raw)) => parse_endpoint_list(raw, source),
            Some(RegionList::Inline(specs)) => endpoints_from_specs(specs.clone(), source),
        }
    }
}

fn file_format(path: &Path) -> config::FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("properties" | "ini") => config::FileFormat::Ini,
        _ => config::FileFormat::Toml,
    }
}
