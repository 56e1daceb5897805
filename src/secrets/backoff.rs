//! Retry backoff policy for remote fetches.

use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_CAPACITY: Duration = Duration::from_millis(10_000);

/// Maps a zero-based retry attempt to the wait before that attempt.
///
/// Returns `None` once the attempt exceeds the strategy's ceiling, telling
/// the caller to stop retrying.
pub trait BackoffStrategy: Send + Sync {
    /// Fill in unset parameters. Must be idempotent.
    fn init(&mut self);

    fn wait(&self, attempt: u32) -> Option<Duration>;
}

/// Capped exponential backoff: `min(capacity, initial_interval * 2^attempt)`.
///
/// Fields left unset receive defaults in [`BackoffStrategy::init`]. A zero
/// initial interval or zero capacity set explicitly switches to fast-retry
/// mode where every wait is zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExponentialBackoff {
    max_attempts: Option<u32>,
    initial_interval: Option<Duration>,
    capacity: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn new(max_attempts: u32, initial_interval: Duration, capacity: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            initial_interval: Some(initial_interval),
            capacity: Some(capacity),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_initial_interval(mut self, initial_interval: Duration) -> Self {
        self.initial_interval = Some(initial_interval);
        self
    }

    pub fn with_capacity(mut self, capacity: Duration) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn init(&mut self) {
        self.max_attempts.get_or_insert(DEFAULT_MAX_ATTEMPTS);
        self.initial_interval.get_or_insert(DEFAULT_INITIAL_INTERVAL);
        self.capacity.get_or_insert(DEFAULT_CAPACITY);
    }

    fn wait(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts() {
            return None;
        }

        let initial = self.initial_interval.unwrap_or(DEFAULT_INITIAL_INTERVAL);
        let capacity = self.capacity.unwrap_or(DEFAULT_CAPACITY);
        if initial.is_zero() || capacity.is_zero() {
            return Some(Duration::ZERO);
        }

        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let initial_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
        let capacity_ms = u64::try_from(capacity.as_millis()).unwrap_or(u64::MAX);
        Some(Duration::from_millis(initial_ms.saturating_mul(factor).min(capacity_ms)))
    }
}
