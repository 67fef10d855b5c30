//! Status conditions.
//!
//! Conditions are kept in insertion order. Setting a condition replaces the
//! entry of the same type in place; a condition type, once present, is never
//! removed. `last_transition_time` only moves when the status flips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition types surfaced on every managed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The external resource is usable.
    Ready,
    /// The last interaction with the provider succeeded.
    Synced,
    /// The external resource matches the desired parameters.
    UpToDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition reasons.
pub mod reason {
    pub const AVAILABLE: &str = "Available";
    pub const CREATING: &str = "Creating";
    pub const DELETING: &str = "Deleting";
    pub const UNAVAILABLE: &str = "Unavailable";

    pub const RECONCILE_SUCCESS: &str = "ReconcileSuccess";
    pub const REFERENCE_NOT_READY: &str = "ReferenceNotReady";
    pub const REFERENCE_AMBIGUOUS: &str = "ReferenceAmbiguous";
    pub const PROVIDER_TRANSIENT: &str = "ProviderTransient";
    pub const PROVIDER_REJECTED: &str = "ProviderRejected";
    pub const INVALID_SPEC: &str = "InvalidSpec";
    pub const RECONCILE_ERROR: &str = "ReconcileError";

    pub const NO_DRIFT: &str = "NoDrift";
    pub const UPDATE_PENDING: &str = "UpdatePending";
    pub const IMMUTABLE_FIELD_CHANGED: &str = "ImmutableFieldChanged";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(type_: ConditionType, status: ConditionStatus, reason: &str) -> Self {
        Self {
            type_,
            status,
            reason: reason.to_string(),
            message: None,
            last_transition_time: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn available() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::True, reason::AVAILABLE)
    }

    pub fn creating() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, reason::CREATING)
    }

    pub fn deleting() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, reason::DELETING)
    }

    pub fn unavailable() -> Self {
        Self::new(ConditionType::Ready, ConditionStatus::False, reason::UNAVAILABLE)
    }

    pub fn reconcile_success() -> Self {
        Self::new(
            ConditionType::Synced,
            ConditionStatus::True,
            reason::RECONCILE_SUCCESS,
        )
    }

    pub fn reconcile_error(reason: &str, message: impl Into<String>) -> Self {
        Self::new(ConditionType::Synced, ConditionStatus::False, reason).with_message(message)
    }

    pub fn up_to_date() -> Self {
        Self::new(ConditionType::UpToDate, ConditionStatus::True, reason::NO_DRIFT)
    }

    pub fn update_pending(fields: &[&str]) -> Self {
        Self::new(
            ConditionType::UpToDate,
            ConditionStatus::False,
            reason::UPDATE_PENDING,
        )
        .with_message(format!("updating: {}", fields.join(", ")))
    }

    pub fn immutable_field_changed(fields: &[&str]) -> Self {
        Self::new(
            ConditionType::UpToDate,
            ConditionStatus::False,
            reason::IMMUTABLE_FIELD_CHANGED,
        )
        .with_message(format!(
            "immutable fields cannot be updated without recreating the resource: {}",
            fields.join(", ")
        ))
    }

    /// Same status, reason and message; transition time ignored.
    fn same_as(&self, other: &Condition) -> bool {
        self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

/// Ordered set of conditions, at most one per type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set a condition. Returns true if anything observable changed.
    pub fn set(&mut self, mut condition: Condition) -> bool {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.same_as(&condition) {
                    return false;
                }
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
                true
            }
            None => {
                self.0.push(condition);
                true
            }
        }
    }

    pub fn get(&self, type_: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    pub fn is_true(&self, type_: ConditionType) -> bool {
        self.get(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Reason of the condition of the given type, if present.
    pub fn reason(&self, type_: ConditionType) -> Option<&str> {
        self.get(type_).map(|c| c.reason.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
