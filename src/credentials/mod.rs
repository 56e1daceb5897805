//! # Credentials
//!
//! Resolves the credential configuration the client signs requests with.
//! Credential material is consumed, never minted: the providers in
//! [`provider`] only read keys that the platform has already issued.

pub mod provider;

use std::sync::Arc;

use crate::config::{
    PropertySource, RawProperties, CREDENTIALS_ACCESS_KEY_ID, CREDENTIALS_ACCESS_SECRET,
    CREDENTIALS_DURATION_SECONDS, CREDENTIALS_OIDC_PROVIDER_ARN, CREDENTIALS_OIDC_TOKEN_FILE_PATH,
    CREDENTIALS_ROLE_ARN, CREDENTIALS_ROLE_NAME, CREDENTIALS_TYPE,
};
use crate::errors::{Error, Result};
use crate::secrets::SecretString;

pub use provider::{
    AccessKeyCredential, CredentialsProvider, EcsRamRoleProvider, OidcRoleProvider,
    StaticCredentialsProvider,
};

/// Declarative description of where credentials come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsConfig {
    /// A long-lived access key pair
    AccessKey { access_key_id: String, access_key_secret: SecretString },
    /// The RAM role attached to the host, read from the instance metadata service
    EcsRamRole { role_name: String },
    /// A role assumed with an OIDC token file
    OidcRoleArn {
        role_arn: String,
        oidc_provider_arn: String,
        oidc_token_file_path: String,
        role_session_name: Option<String>,
        policy: Option<String>,
        sts_endpoint: Option<String>,
        duration_seconds: Option<u32>,
    },
}

impl CredentialsConfig {
    pub fn access_key(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self::AccessKey {
            access_key_id: access_key_id.into(),
            access_key_secret: SecretString::new(access_key_secret),
        }
    }

    /// Parse credentials from one property source.
    ///
    /// Returns `Ok(None)` when the source does not declare a credentials type.
    pub fn from_properties(properties: &RawProperties, source: PropertySource) -> Result<Option<Self>> {
        let Some(kind) = RawProperties::value(&properties.credentials_type) else {
            return Ok(None);
        };

        let required = |field: &Option<String>, key: &str| -> Result<String> {
            RawProperties::value(field)
                .map(str::to_string)
                .ok_or_else(|| Error::config(source.missing_param(key)))
        };
        let optional = |field: &Option<String>| RawProperties::value(field).map(str::to_string);

        let config = match kind {
            "ak" => Self::AccessKey {
                access_key_id: required(&properties.credentials_access_key_id, CREDENTIALS_ACCESS_KEY_ID)?,
                access_key_secret: SecretString::new(required(
                    &properties.credentials_access_secret,
                    CREDENTIALS_ACCESS_SECRET,
                )?),
            },
            "ecs_ram_role" => Self::EcsRamRole {
                role_name: required(&properties.credentials_role_name, CREDENTIALS_ROLE_NAME)?,
            },
            "oidc_role_arn" => {
                let duration_seconds = match RawProperties::value(&properties.credentials_duration_seconds) {
                    None => None,
                    Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
                        Error::config(source.illegal_param(CREDENTIALS_DURATION_SECONDS))
                    })?),
                };
                Self::OidcRoleArn {
                    role_arn: required(&properties.credentials_role_arn, CREDENTIALS_ROLE_ARN)?,
                    oidc_provider_arn: required(
                        &properties.credentials_oidc_provider_arn,
                        CREDENTIALS_OIDC_PROVIDER_ARN,
                    )?,
                    oidc_token_file_path: required(
                        &properties.credentials_oidc_token_file_path,
                        CREDENTIALS_OIDC_TOKEN_FILE_PATH,
                    )?,
                    role_session_name: optional(&properties.credentials_role_session_name),
                    policy: optional(&properties.credentials_policy),
                    sts_endpoint: optional(&properties.credentials_sts_endpoint),
                    duration_seconds,
                }
            }
            _ => return Err(Error::config(source.illegal_param(CREDENTIALS_TYPE))),
        };

        Ok(Some(config))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccessKey { .. } => "ak",
            Self::EcsRamRole { .. } => "ecs_ram_role",
            Self::OidcRoleArn { .. } => "oidc_role_arn",
        }
    }

    /// Build the provider that yields credential material for this configuration
    pub fn into_provider(self) -> Arc<dyn CredentialsProvider> {
        match self {
            Self::AccessKey { access_key_id, access_key_secret } => {
                Arc::new(StaticCredentialsProvider::new(access_key_id, access_key_secret))
            }
            Self::EcsRamRole { role_name } => Arc::new(EcsRamRoleProvider::new(role_name)),
            Self::OidcRoleArn {
                role_arn,
                oidc_provider_arn,
                oidc_token_file_path,
                role_session_name,
                policy,
                sts_endpoint,
                duration_seconds,
            } => {
                let mut provider =
                    OidcRoleProvider::new(role_arn, oidc_provider_arn, oidc_token_file_path);
                if let Some(name) = role_session_name {
                    provider = provider.with_role_session_name(name);
                }
                if let Some(policy) = policy {
                    provider = provider.with_policy(policy);
                }
                if let Some(endpoint) = sts_endpoint {
                    provider = provider.with_sts_endpoint(endpoint);
                }
                if let Some(seconds) = duration_seconds {
                    provider = provider.with_duration_seconds(seconds);
                }
                Arc::new(provider)
            }
        }
    }
}
