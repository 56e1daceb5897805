//! # Structured Logging
//!
//! Span macros and subscriber setup built on the tracing ecosystem.
//!
//! Fields used throughout the crate: `secret_name`, `endpoint`, `attempt`,
//! `error`. Secret payloads are never recorded.

use tracing_subscriber::{fmt, EnvFilter};

/// Create a tracing span for an operation on one secret.
///
/// ```rust,ignore
/// let span = secret_span!("refresh", "db-password");
/// let span = secret_span!("fetch", "db-password", endpoint = "kms.cn-hangzhou.aliyuncs.com");
/// ```
#[macro_export]
macro_rules! secret_span {
    ($operation:expr, $secret_name:expr) => {
        tracing::info_span!(
            "secret_operation",
            operation = %$operation,
            secret_name = %$secret_name,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $secret_name:expr, $($field:tt)*) => {
        tracing::info_span!(
            "secret_operation",
            operation = %$operation,
            secret_name = %$secret_name,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Subscriber settings for embedders that want the crate to install one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl LoggingConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Install a global subscriber.
///
/// Returns `false` when a subscriber was already installed elsewhere; that case
/// is not an error.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let installed = if config.json {
        tracing::subscriber::set_global_default(
            fmt().json().with_env_filter(config.filter()).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(fmt().with_env_filter(config.filter()).finish())
    };
    installed.is_ok()
}

/// Log the effective client settings at startup
pub fn log_client_config(endpoint_count: usize, credentials_kind: Option<&str>, request_waiting_ms: u128) {
    tracing::info!(
        endpoint_count = endpoint_count,
        credentials = credentials_kind.unwrap_or("none"),
        request_waiting_ms = request_waiting_ms as u64,
        "Secrets fetcher configuration"
    );
}
