//! Reconcile error taxonomy.
//!
//! Every failed turn ends in exactly one of these. The variant decides the
//! `Synced=False` reason written to the record and how the worker retries.

use std::time::Duration;

use metal_api::{reason, ApiError};
use thiserror::Error;

use crate::provider::ProviderError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{field}: {message}")]
    ReferenceNotReady {
        field: &'static str,
        message: String,
    },

    #[error("{field}: selector matched {matches} records, expected exactly one")]
    ReferenceAmbiguous { field: &'static str, matches: usize },

    #[error("provider unavailable: {0}")]
    ProviderTransient(String),

    #[error("provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// The record changed underneath this turn; its writes were discarded.
    #[error("record was modified concurrently")]
    Conflict,

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// How the worker schedules the next turn after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Exponential backoff keyed by consecutive failures.
    Backoff,
    /// Wait for the record (or something it references) to change.
    AwaitChange,
    /// Requeue right away against a fresh copy.
    Immediate,
}

impl ReconcileError {
    pub fn reference_not_ready(field: &'static str, message: impl Into<String>) -> Self {
        Self::ReferenceNotReady {
            field,
            message: message.into(),
        }
    }

    /// `Synced=False` reason for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ReferenceNotReady { .. } => reason::REFERENCE_NOT_READY,
            Self::ReferenceAmbiguous { .. } => reason::REFERENCE_AMBIGUOUS,
            Self::ProviderTransient(_) => reason::PROVIDER_TRANSIENT,
            Self::ProviderRejected(_) => reason::PROVIDER_REJECTED,
            Self::InvalidSpec(_) => reason::INVALID_SPEC,
            Self::Conflict | Self::Store(_) | Self::Internal(_) => reason::RECONCILE_ERROR,
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            // Fan-out from the referenced kinds wakes these up early.
            Self::ReferenceNotReady { .. } => RetryClass::Backoff,
            Self::ReferenceAmbiguous { .. } | Self::ProviderRejected(_) | Self::InvalidSpec(_) => {
                RetryClass::AwaitChange
            }
            Self::Conflict => RetryClass::Immediate,
            Self::ProviderTransient(_) | Self::Store(_) | Self::Internal(_) => RetryClass::Backoff,
        }
    }

    /// Whether the error should be written to the record's conditions.
    /// A conflicted turn has nothing trustworthy to write.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Conflict)
    }
}

impl From<ProviderError> for ReconcileError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected { .. } => Self::ProviderRejected(err.to_string()),
            ProviderError::NotFound(_)
            | ProviderError::Transient(_)
            | ProviderError::Timeout(_) => Self::ProviderTransient(err.to_string()),
            ProviderError::Decode(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => Self::Conflict,
            other => Self::Store(other),
        }
    }
}

impl From<ApiError> for ReconcileError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::InvalidSpec(msg) => Self::InvalidSpec(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Convenience for provider calls bounded by a timeout.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, ProviderError>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metal_api::{Kind, ObjectKey};
    use rstest::rstest;

    #[rstest]
    #[case(ReconcileError::reference_not_ready("deviceId", "x"), RetryClass::Backoff)]
    #[case(ReconcileError::ReferenceAmbiguous { field: "deviceId", matches: 2 }, RetryClass::AwaitChange)]
    #[case(ReconcileError::ProviderTransient("503".into()), RetryClass::Backoff)]
    #[case(ReconcileError::ProviderRejected("422".into()), RetryClass::AwaitChange)]
    #[case(ReconcileError::InvalidSpec("plan".into()), RetryClass::AwaitChange)]
    #[case(ReconcileError::Conflict, RetryClass::Immediate)]
    fn test_retry_class(#[case] err: ReconcileError, #[case] expected: RetryClass) {
        assert_eq!(err.retry_class(), expected);
    }

    #[test]
    fn test_provider_error_mapping() {
        let rejected = ProviderError::Rejected {
            status: 422,
            message: "plan not available".into(),
        };
        let err = ReconcileError::from(rejected);
        assert_eq!(err.reason(), reason::PROVIDER_REJECTED);

        let err = ReconcileError::from(ProviderError::Timeout(Duration::from_secs(30)));
        assert_eq!(err.reason(), reason::PROVIDER_TRANSIENT);
    }

    #[test]
    fn test_store_conflict_is_not_reported() {
        let err = ReconcileError::from(StoreError::Conflict {
            key: ObjectKey::new(Kind::Device, "db-1"),
            expected: 3,
            actual: 4,
        });
        assert!(matches!(err, ReconcileError::Conflict));
        assert!(!err.is_reportable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapses() {
        let result: Result<(), _> = with_timeout(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }
}
