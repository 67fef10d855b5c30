//! Assignment: a virtual network attached to a device port.

use serde::{Deserialize, Serialize};

use crate::{Kind, ObjectMeta, Reference, ResourceSpec, ResourceStatus, Selector};

/// Desired state of an assignment. Every field is immutable.
///
/// The device and virtual network identities are each given directly, by
/// reference, or by selector, in that order of precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentParameters {
    /// Port name on the device, e.g. `eth1` or `bond0`.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id_ref: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id_selector: Option<Selector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_network_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_network_id_ref: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_network_id_selector: Option<Selector>,
}

/// Observed state of the port/network attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentObservation {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_network_id: Option<String>,

    /// `assigning`, `assigned` or `unassigning`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Assignment states reported by the provider.
pub mod assignment_state {
    pub const ASSIGNING: &str = "assigning";
    pub const ASSIGNED: &str = "assigned";
    pub const UNASSIGNING: &str = "unassigning";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    pub for_provider: AssignmentParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentStatus {
    #[serde(flatten)]
    pub resource: ResourceStatus,
    #[serde(default)]
    pub at_provider: AssignmentObservation,
}

/// A managed port/virtual-network assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub metadata: ObjectMeta,
    pub spec: AssignmentSpec,
    #[serde(default)]
    pub status: AssignmentStatus,
}

crate::managed_kind!(Assignment, Kind::Assignment);

impl Assignment {
    pub fn new(name: impl Into<String>, for_provider: AssignmentParameters) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: AssignmentSpec {
                resource: ResourceSpec::default(),
                for_provider,
            },
            status: AssignmentStatus::default(),
        }
    }
}
