//! Secret retrieval and caching.
//!
//! - [`backoff`]: retry wait policy with a hard ceiling
//! - [`fetcher`]: multi-endpoint fetch with retry and racing
//! - [`cache`]: TTL cache with per-name locking and scheduled refresh
//!
//! The cache talks to its collaborators through traits ([`SecretFetcher`],
//! [`CacheStore`], [`RefreshStrategy`], [`CacheHook`], [`Clock`]), each with a
//! default implementation picked by [`SecretCacheBuilder`].

pub mod backoff;
pub mod builder;
pub mod cache;
pub mod clock;
pub mod fetcher;
pub mod hook;
pub mod probe;
pub mod refresh;
pub mod store;
pub mod transport;
pub mod types;

pub use backoff::{BackoffStrategy, ExponentialBackoff};
pub use builder::SecretCacheBuilder;
pub use cache::{SecretCache, DEFAULT_TTL};
pub use clock::{Clock, SystemClock};
pub use fetcher::{
    ResilientSecretFetcher, ResilientSecretFetcherBuilder, SecretFetcher, DEFAULT_REQUEST_WAITING_TIME,
};
pub use hook::{CacheHook, DefaultCacheHook};
pub use probe::{LatencyProbe, PingProbe};
pub use refresh::{JsonTtlRefreshStrategy, RefreshStrategy};
pub use store::{CacheStore, MemoryCacheStore};
pub use transport::{
    GetSecretValueRequest, GetSecretValueResponse, HttpSecretTransport, HttpTransportFactory, SecretTransport,
    TransportFactory,
};
pub use types::{CacheLookup, CachedSecretInfo, SecretDataType, SecretInfo, SecretString, STAGE_ACS_CURRENT};
