//! VirtualNetwork: the target of assignment references.
//!
//! Virtual networks are provisioned outside this controller; their records
//! only need to carry an `externalName` once they exist.

use serde::{Deserialize, Serialize};

use crate::{Kind, ObjectMeta, ResourceSpec, ResourceStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vxlan: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkObservation {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vxlan: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    #[serde(default)]
    pub for_provider: VirtualNetworkParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkStatus {
    #[serde(flatten)]
    pub resource: ResourceStatus,
    #[serde(default)]
    pub at_provider: VirtualNetworkObservation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetwork {
    pub metadata: ObjectMeta,
    pub spec: VirtualNetworkSpec,
    #[serde(default)]
    pub status: VirtualNetworkStatus,
}

crate::managed_kind!(VirtualNetwork, Kind::VirtualNetwork);

impl VirtualNetwork {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            ..Default::default()
        }
    }

    /// Builder-style setter for an already provisioned network.
    #[must_use]
    pub fn with_external_name(mut self, external_name: impl Into<String>) -> Self {
        self.spec.resource.external_name = Some(external_name.into());
        self
    }
}
