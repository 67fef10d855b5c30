//! Retry backoff and per-key failure accounting.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay. Jitter never pushes a delay past this bound.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(300),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = 2_f64.powi(attempt.min(30) as i32);
        let max_ms = self.max.as_millis() as f64;
        let delay = (self.base.as_millis() as f64 * exp).min(max_ms);

        let jitter = self.jitter.clamp(0.0, 1.0);
        let spread = if jitter > 0.0 {
            rand::rng().random_range(-jitter..=jitter)
        } else {
            0.0
        };
        let jittered = (delay * (1.0 + spread)).clamp(0.0, max_ms);

        Duration::from_millis(jittered as u64)
    }
}

/// Consecutive failure counts per key.
///
/// The count feeds [`BackoffPolicy::delay`]; it is reset on the first success.
#[derive(Debug)]
pub struct FailureTracker<K> {
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> Default for FailureTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> FailureTracker<K> {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            failures: HashMap::new(),
        }
    }

    /// Record a failure and return the number of failures before this one.
    pub fn record_failure(&mut self, key: &K) -> u32 {
        let count = self.failures.entry(key.clone()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    /// Number of consecutive failures recorded for a key.
    pub fn failures(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }

    /// Clear failure tracking for a key (on success).
    pub fn clear(&mut self, key: &K) {
        self.failures.remove(key);
    }
}
