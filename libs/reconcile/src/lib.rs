//! Reconciliation loop primitives.
//!
//! This library provides the building blocks the controller uses to run
//! convergence loops against an external API:
//!
//! - **Work queue**: keyed queue that hands a key to at most one worker at a
//!   time and coalesces notifications that arrive while it is being processed.
//! - **Backoff**: exponential retry delays with jitter, capped at a maximum.
//! - **Failure tracking**: per-key consecutive failure counters.
//! - **Spec hash**: deterministic digest of a JSON document.
//!
//! # Invariants
//!
//! - A key is never handed to two workers concurrently
//! - A notification is never lost: keys added while processing are re-queued
//! - Hashes are deterministic given the same document, independent of key order

mod backoff;
mod hash;
mod queue;

use std::time::Duration;

pub use backoff::{BackoffPolicy, FailureTracker};
pub use hash::SpecHash;
pub use queue::WorkQueue;

/// What the loop should do with a key after a reconcile turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the given delay.
    Requeue(Duration),

    /// Do not schedule; wait for the next change notification.
    AwaitChange,

    /// The record is gone; drop all bookkeeping for it.
    Forget,
}

impl Action {
    /// Requeue without delay.
    pub const fn immediate() -> Self {
        Self::Requeue(Duration::ZERO)
    }

    /// Returns the requeue delay, if any.
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Requeue(d) => Some(*d),
            Self::AwaitChange | Self::Forget => None,
        }
    }
}

/// Default interval between polls of a converged resource.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default interval while the external resource is mid-transition.
pub const DEFAULT_TRANSITION_INTERVAL: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_delay() {
        assert_eq!(Action::immediate().delay(), Some(Duration::ZERO));
        assert_eq!(
            Action::Requeue(Duration::from_secs(5)).delay(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(Action::AwaitChange.delay(), None);
        assert_eq!(Action::Forget.delay(), None);
    }
}
