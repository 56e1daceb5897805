//! Secret value types.
//!
//! Secret payloads are wrapped in [`SecretString`] so they never leak through
//! logging, debugging, or error messages.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Version stage fetched by default
pub const STAGE_ACS_CURRENT: &str = "ACSCurrent";

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// - Debug output shows `SecretString([REDACTED])`
/// - Display output shows `[REDACTED]`
/// - Serialization outputs `"[REDACTED]"`, deserialization accepts real values
/// - Memory is zeroed on drop (via `zeroize`)
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying secret value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(SecretString(String::deserialize(deserializer)?))
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// How a secret's payload should be interpreted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SecretDataType {
    #[default]
    Text,
    Binary,
    /// A type string this client does not recognise
    Unknown(String),
}

impl SecretDataType {
    pub fn as_str(&self) -> &str {
        match self {
            SecretDataType::Text => "text",
            SecretDataType::Binary => "binary",
            SecretDataType::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for SecretDataType {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "text" => SecretDataType::Text,
            "binary" => SecretDataType::Binary,
            _ => SecretDataType::Unknown(value.to_string()),
        }
    }
}

impl fmt::Display for SecretDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for SecretDataType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SecretDataType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(SecretDataType::from(raw.as_str()))
    }
}

/// A secret version as returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecretInfo {
    pub secret_name: String,
    pub version_id: String,
    pub secret_value: SecretString,
    pub secret_data_type: SecretDataType,
    pub create_time: Option<String>,
    pub secret_type: Option<String>,
    pub automatic_rotation: Option<String>,
    /// Opaque JSON document; may carry a per-secret TTL directive
    pub extended_config: Option<String>,
    pub rotation_interval: Option<String>,
    pub next_rotation_date: Option<String>,
}

impl SecretInfo {
    /// Create a text secret with only the mandatory fields populated
    pub fn text(name: impl Into<String>, version_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            secret_name: name.into(),
            version_id: version_id.into(),
            secret_value: SecretString::new(value),
            secret_data_type: SecretDataType::Text,
            ..Default::default()
        }
    }

    /// Create a binary secret; the value is the service's encoded payload
    pub fn binary(
        name: impl Into<String>,
        version_id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self { secret_data_type: SecretDataType::Binary, ..Self::text(name, version_id, value) }
    }

    pub fn with_extended_config(mut self, extended_config: impl Into<String>) -> Self {
        self.extended_config = Some(extended_config.into());
        self
    }
}

/// A cached secret version plus refresh bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSecretInfo {
    pub secret_info: SecretInfo,
    pub stage: String,
    /// Epoch milliseconds of the last successful refresh
    pub refresh_timestamp_ms: i64,
}

impl CachedSecretInfo {
    pub fn new(secret_info: SecretInfo, stage: impl Into<String>, refresh_timestamp_ms: i64) -> Self {
        Self { secret_info, stage: stage.into(), refresh_timestamp_ms }
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_info.secret_name
    }
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Entry exists and is within its TTL
    Fresh(CachedSecretInfo),
    /// Entry exists but its TTL has elapsed
    Stale(CachedSecretInfo),
    /// No entry stored for the name
    Absent,
}

impl CacheLookup {
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheLookup::Fresh(_))
    }
}
