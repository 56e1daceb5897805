//! # Observability
//!
//! Structured logging and metrics for the secrets cache client.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_client_config, LoggingConfig};
pub use metrics::MetricsRecorder;
