//! # secrets-cache-client
//!
//! Resilient caching client for a remote secret-management service.
//!
//! Two layers cooperate:
//!
//! ```text
//! application → SecretCache → ResilientSecretFetcher → endpoint 1..n
//!                   ↓                  ↓
//!              CacheStore       BackoffStrategy
//! ```
//!
//! - **SecretCache** answers reads from its store while entries are fresh,
//!   serializes refreshes per secret name, and refreshes every cached secret
//!   in the background ahead of expiry.
//! - **ResilientSecretFetcher** calls the lowest-latency endpoint first and
//!   races all endpoints under retry and backoff when that call fails
//!   transiently.
//!
//! ## Credentials
//!
//! Requests are signed with credentials from the environment, the properties
//! file, or the fetcher builder, in that order of precedence. There is no
//! implicit default credential chain: if none of the three sources yields
//! credentials, [`ResilientSecretFetcher`] initialization fails with a
//! configuration error.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use secrets_cache_client::{ResilientSecretFetcher, Result, SecretCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let cache = SecretCache::builder()
//!         .with_fetcher_builder(
//!             ResilientSecretFetcher::builder()
//!                 .with_regions(["cn-hangzhou"])
//!                 .with_access_key("access-key-id", "access-key-secret"),
//!         )
//!         .build()
//!         .await?;
//!
//!     let password = cache.get_string_value("db-password").await?;
//!     println!("fetched {} bytes", password.len());
//!     cache.close().await
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod errors;
pub mod observability;
pub mod secrets;

pub use config::{Endpoint, EndpointKey, NetworkMode};
pub use credentials::{CredentialsConfig, CredentialsProvider};
pub use errors::{Error, RemoteError, RemoteErrorKind, Result};
pub use observability::{init_logging, LoggingConfig};
pub use secrets::{
    CacheLookup, ExponentialBackoff, ResilientSecretFetcher, SecretCache, SecretCacheBuilder, SecretInfo,
    SecretString,
};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
