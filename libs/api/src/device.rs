//! Device: a bare-metal server.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{ApiError, DataKeySelector, Kind, ObjectMeta, ResourceSpec, ResourceStatus};

/// Accepted values for `networkType`.
pub const NETWORK_TYPES: [&str; 4] = ["hybrid", "layer2-individual", "layer2-bonded", "layer3"];

/// Facility value that lets the provider pick; the observed facility then
/// legitimately differs from the spec.
pub const FACILITY_ANY: &str = "any";

// =============================================================================
// Lifecycle
// =============================================================================

/// Provider-reported device lifecycle state.
///
/// ```text
/// queued -> provisioning -> active | failed
/// active <-> powering_off -> inactive -> powering_on -> active
/// active -> reinstalling -> active
/// any -> deprovisioning -> (removed)
/// ```
///
/// Unrecognised strings are kept verbatim in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Queued,
    Provisioning,
    Active,
    Failed,
    PoweringOn,
    PoweringOff,
    Inactive,
    Reinstalling,
    Deprovisioning,
    Unknown(String),
}

impl DeviceState {
    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "provisioning" => Self::Provisioning,
            "active" => Self::Active,
            "failed" => Self::Failed,
            "powering_on" => Self::PoweringOn,
            "powering_off" => Self::PoweringOff,
            "inactive" => Self::Inactive,
            "reinstalling" => Self::Reinstalling,
            "deprovisioning" => Self::Deprovisioning,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::PoweringOn => "powering_on",
            Self::PoweringOff => "powering_off",
            Self::Inactive => "inactive",
            Self::Reinstalling => "reinstalling",
            Self::Deprovisioning => "deprovisioning",
            Self::Unknown(s) => s,
        }
    }

    /// States in which the provider has no workflow in progress, so updates
    /// and deletes will not race it.
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Active | Self::Failed | Self::Inactive)
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DeviceState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeviceState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// IP address block requested at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    pub address_family: u8,
    pub public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<u8>,
    #[serde(default, rename = "ip_reservations", skip_serializing_if = "Vec::is_empty")]
    pub reservations: Vec<String>,
}

/// Desired state of a device.
///
/// Optional fields left unset are filled in from the provider once
/// (late initialization) so later diffs do not flag provider defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceParameters {
    /// Immutable.
    pub plan: String,

    /// Immutable. Exactly one of `facility` / `metro`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,

    /// Immutable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,

    /// Immutable.
    pub operating_system: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_cycle: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userdata: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userdata_ref: Option<DataKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipxe_script_url: Option<String>,

    /// Immutable.
    #[serde(
        default,
        rename = "publicIPv4SubnetSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub public_ipv4_subnet_size: Option<u8>,

    #[serde(default, rename = "alwaysPXE", skip_serializing_if = "Option::is_none")]
    pub always_pxe: Option<bool>,

    /// Immutable.
    #[serde(
        default,
        rename = "hardwareReservationID",
        skip_serializing_if = "Option::is_none"
    )]
    pub hardware_reservation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,

    /// Immutable.
    #[serde(default, rename = "userSSHKeys", skip_serializing_if = "Option::is_none")]
    pub user_ssh_keys: Option<Vec<String>>,

    /// Immutable.
    #[serde(default, rename = "projectSSHKeys", skip_serializing_if = "Option::is_none")]
    pub project_ssh_keys: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,

    /// Immutable. e.g. `tpm: required`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<BTreeMap<String, String>>,

    /// Immutable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_addresses: Option<Vec<IpAddress>>,
}

impl DeviceParameters {
    pub fn new(plan: impl Into<String>, operating_system: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            operating_system: operating_system.into(),
            ..Default::default()
        }
    }

    /// Structural checks the provider would otherwise reject.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.plan.trim().is_empty() {
            return Err(ApiError::InvalidSpec("plan is required".into()));
        }
        if self.operating_system.trim().is_empty() {
            return Err(ApiError::InvalidSpec("operatingSystem is required".into()));
        }
        match (non_empty(&self.facility), non_empty(&self.metro)) {
            (Some(_), Some(_)) => {
                return Err(ApiError::InvalidSpec(
                    "only one of facility or metro may be set".into(),
                ))
            }
            (None, None) => {
                return Err(ApiError::InvalidSpec(
                    "one of facility or metro is required".into(),
                ))
            }
            _ => {}
        }
        if let Some(network_type) = &self.network_type {
            if !NETWORK_TYPES.contains(&network_type.as_str()) {
                return Err(ApiError::InvalidSpec(format!(
                    "networkType must be one of {}, got {network_type:?}",
                    NETWORK_TYPES.join(", ")
                )));
            }
        }
        if self.userdata.is_some() && self.userdata_ref.is_some() {
            return Err(ApiError::InvalidSpec(
                "only one of userdata or userdataRef may be set".into(),
            ));
        }
        Ok(())
    }

    /// Immutable parameters the provider does not report back, keyed by
    /// wire name.
    ///
    /// Location is included because a metro placement never echoes the
    /// facility the caller asked for. Key lists are sorted, order carries
    /// no meaning.
    pub fn unobserved_immutables(&self) -> Vec<(&'static str, serde_json::Value)> {
        vec![
            ("facility", serde_json::json!(self.facility)),
            ("metro", serde_json::json!(self.metro)),
            ("publicIPv4SubnetSize", serde_json::json!(self.public_ipv4_subnet_size)),
            ("userSSHKeys", serde_json::json!(sorted(&self.user_ssh_keys))),
            ("projectSSHKeys", serde_json::json!(sorted(&self.project_ssh_keys))),
            ("features", serde_json::json!(self.features)),
            ("ipAddresses", serde_json::json!(self.ip_addresses)),
        ]
    }
}

fn sorted(keys: &Option<Vec<String>>) -> Option<Vec<String>> {
    keys.clone().map(|mut keys| {
        keys.sort();
        keys
    })
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

// =============================================================================
// Observation
// =============================================================================

/// Observed state of the device, as last reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceObservation {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,

    /// May differ from `spec.forProvider.facility` when `any` was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<DeviceState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provision_percentage: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,

    #[serde(default)]
    pub locked: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Record
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    #[serde(flatten)]
    pub resource: ResourceSpec,
    pub for_provider: DeviceParameters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[serde(flatten)]
    pub resource: ResourceStatus,
    #[serde(default)]
    pub at_provider: DeviceObservation,
}

/// A managed bare-metal server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub metadata: ObjectMeta,
    pub spec: DeviceSpec,
    #[serde(default)]
    pub status: DeviceStatus,
}

crate::managed_kind!(Device, Kind::Device);

impl Device {
    pub fn new(name: impl Into<String>, for_provider: DeviceParameters) -> Self {
        Self {
            metadata: ObjectMeta::named(name),
            spec: DeviceSpec {
                resource: ResourceSpec::default(),
                for_provider,
            },
            status: DeviceStatus::default(),
        }
    }
}
