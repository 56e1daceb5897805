//! # Error Types
//!
//! Error taxonomy for the secrets cache client using `thiserror`.
//!
//! Errors fall into four families:
//! - configuration errors, fatal and surfaced synchronously from `init`
//! - transient remote errors, retried and raced across endpoints
//! - fatal remote errors, never retried
//! - cache store errors, propagated without touching lock or timer state

use std::fmt;

use super::remote::{RemoteError, RemoteErrorKind};

/// Custom result type for secrets cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the secrets cache client
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing or invalid endpoint / credential configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Caller supplied an unusable argument (e.g. an empty secret name)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A single endpoint answered with an error
    #[error(
        "Remote call for secret '{secret_name}' failed at {endpoint} after {attempts} attempt(s): {source}"
    )]
    Remote {
        secret_name: String,
        endpoint: String,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    /// Every endpoint in the race failed or the request deadline elapsed
    #[error("All endpoints failed for secret '{secret_name}': {}", FailureList(failures))]
    AllEndpointsFailed { secret_name: String, failures: Vec<EndpointFailure> },

    /// The cache store could not read or persist an entry
    #[error("Cache store error for secret '{secret_name}': {message}")]
    Cache { secret_name: String, message: String },

    /// The recorded data type does not match the requested projection
    #[error("The secret named[{secret_name}] does not support {expected} value (recorded type: {actual})")]
    TypeMismatch { secret_name: String, expected: String, actual: String },

    /// A lifecycle hook rejected or failed to transform a value
    #[error("Cache hook error for secret '{secret_name}': {message}")]
    Hook { secret_name: String, message: String },

    /// The hook suppressed storage, so there is nothing to return
    #[error("No cache entry could be produced for secret '{secret_name}'")]
    NoCacheEntry { secret_name: String },
}

/// Last failure recorded for one endpoint during a race
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointFailure {
    /// Endpoint host the failure came from
    pub endpoint: String,
    /// Number of remote calls issued against the endpoint
    pub attempts: u32,
    /// The last error observed
    pub error: RemoteError,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} attempt(s): {}", self.endpoint, self.attempts, self.error)
    }
}

struct FailureList<'a>(&'a [EndpointFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "[{}]", failure)?;
        }
        Ok(())
    }
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create an invalid argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Create a remote error for a single endpoint
    pub fn remote<N: Into<String>, E: Into<String>>(
        secret_name: N,
        endpoint: E,
        attempts: u32,
        source: RemoteError,
    ) -> Self {
        Self::Remote { secret_name: secret_name.into(), endpoint: endpoint.into(), attempts, source }
    }

    /// Create a cache store error
    pub fn cache<N: Into<String>, S: Into<String>>(secret_name: N, message: S) -> Self {
        Self::Cache { secret_name: secret_name.into(), message: message.into() }
    }

    /// Create a cache hook error
    pub fn hook<N: Into<String>, S: Into<String>>(secret_name: N, message: S) -> Self {
        Self::Hook { secret_name: secret_name.into(), message: message.into() }
    }

    /// Whether the failure is transient (throttling, timeouts, connection loss...)
    ///
    /// Transient failures are the ones a cache hook may paper over with a
    /// last-known-good value.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Remote { source, .. } => source.kind.is_recoverable(),
            Error::AllEndpointsFailed { failures, .. } => {
                !failures.iter().any(|f| f.error.kind == RemoteErrorKind::AccountSuspended)
            }
            _ => false,
        }
    }

    /// Whether eager initialization must abort on this failure
    pub fn is_fatal_for_init(&self) -> bool {
        match self {
            Error::Config { .. } => true,
            Error::Remote { source, .. } => source.kind.is_account_state_fatal(),
            Error::AllEndpointsFailed { failures, .. } => {
                failures.iter().any(|f| f.error.kind.is_account_state_fatal())
            }
            _ => false,
        }
    }

    /// Secret name the failure relates to, if any
    pub fn secret_name(&self) -> Option<&str> {
        match self {
            Error::Remote { secret_name, .. }
            | Error::AllEndpointsFailed { secret_name, .. }
            | Error::Cache { secret_name, .. }
            | Error::TypeMismatch { secret_name, .. }
            | Error::Hook { secret_name, .. }
            | Error::NoCacheEntry { secret_name } => Some(secret_name),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}
