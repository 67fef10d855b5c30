//! Traits and shared spec/status blocks for managed records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{ApiError, ConditionSet, Kind, ObjectKey, ObjectMeta};

/// What happens to the external resource when its record is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    /// Delete the external resource.
    #[default]
    Delete,
    /// Keep the external resource; only the record is removed.
    Retain,
}

/// Spec fields common to every managed kind (inlined into `spec`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,

    /// Provider-side identifier. Set once, on successful creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
}

/// Status fields common to every managed kind (inlined into `status`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default, skip_serializing_if = "ConditionSet::is_empty")]
    pub conditions: ConditionSet,

    /// When the last provider Create call succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_create_succeeded: Option<DateTime<Utc>>,

    /// Per-field hashes of the immutable parameters the provider does not
    /// report back, captured at creation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub immutable_hashes: BTreeMap<String, String>,
}

/// Untyped form of any record, as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    pub kind: Kind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: serde_json::Value,
}

impl DynamicObject {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, &self.metadata.name)
    }

    /// Convert into a typed record.
    pub fn into_typed<R: Resource>(self) -> Result<R, ApiError> {
        R::from_dynamic(self)
    }
}

/// A typed record stored under a [`Kind`].
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: Kind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn name(&self) -> &str {
        &self.metadata().name
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::new(Self::KIND, &self.metadata().name)
    }

    fn to_dynamic(&self) -> Result<DynamicObject, ApiError> {
        let mut value = serde_json::to_value(self)?;
        Ok(DynamicObject {
            kind: Self::KIND,
            metadata: self.metadata().clone(),
            spec: value
                .get_mut("spec")
                .map(serde_json::Value::take)
                .unwrap_or_default(),
            status: value
                .get_mut("status")
                .map(serde_json::Value::take)
                .unwrap_or_default(),
        })
    }

    fn from_dynamic(obj: DynamicObject) -> Result<Self, ApiError> {
        if obj.kind != Self::KIND {
            return Err(ApiError::KindMismatch {
                expected: Self::KIND,
                actual: obj.kind,
            });
        }
        let mut value = serde_json::Map::new();
        value.insert("metadata".into(), serde_json::to_value(&obj.metadata)?);
        value.insert("spec".into(), obj.spec);
        if !obj.status.is_null() {
            value.insert("status".into(), obj.status);
        }
        Ok(serde_json::from_value(serde_json::Value::Object(value))?)
    }
}

/// A record backed by exactly one external resource.
pub trait Managed: Resource {
    fn resource_spec(&self) -> &ResourceSpec;

    fn resource_spec_mut(&mut self) -> &mut ResourceSpec;

    fn resource_status(&self) -> &ResourceStatus;

    fn resource_status_mut(&mut self) -> &mut ResourceStatus;

    fn external_name(&self) -> Option<&str> {
        self.resource_spec()
            .external_name
            .as_deref()
            .filter(|n| !n.is_empty())
    }

    fn reclaim_policy(&self) -> ReclaimPolicy {
        self.resource_spec().reclaim_policy
    }

    fn conditions(&self) -> &ConditionSet {
        &self.resource_status().conditions
    }

    fn conditions_mut(&mut self) -> &mut ConditionSet {
        &mut self.resource_status_mut().conditions
    }
}
