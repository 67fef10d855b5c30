//! Provider API seam.
//!
//! The reconcilers call the provider only through [`DeviceApi`] and
//! [`AssignmentApi`]. [`http::HttpProvider`] talks to the real API;
//! [`fake::FakeProvider`] is a scriptable in-memory stand-in.

pub mod fake;
pub mod http;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metal_api::IpAddress;
use serde::Serialize;
use thiserror::Error;

pub use fake::{FakeProvider, Operation};
pub use http::HttpProvider;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failures, 5xx, throttling.
    #[error("{0}")]
    Transient(String),

    /// 4xx other than 404: the request itself is wrong.
    #[error("status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Result of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The resource was already gone; treated as success.
    AlreadyAbsent,
}

// =============================================================================
// Devices
// =============================================================================

/// Create request for a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceCreate {
    pub plan: String,
    pub operating_system: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metro: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_cycle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userdata: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipxe_script_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ipv4_subnet_size: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub always_pxe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware_reservation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customdata: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_ssh_keys: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub project_ssh_keys: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<IpAddress>,
}

/// Partial update of the mutable device fields. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DevicePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_cycle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userdata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipxe_script_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub always_pxe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customdata: Option<String>,
}

impl DevicePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A device as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderDevice {
    pub id: String,
    pub href: Option<String>,
    pub state: String,
    pub provision_percentage: Option<f64>,
    pub plan: Option<String>,
    pub operating_system: Option<String>,
    pub facility: Option<String>,
    pub metro: Option<String>,
    pub hostname: Option<String>,
    pub description: Option<String>,
    pub billing_cycle: Option<String>,
    pub userdata: Option<String>,
    pub customdata: Option<String>,
    pub tags: Vec<String>,
    pub locked: bool,
    pub ipxe_script_url: Option<String>,
    pub always_pxe: bool,
    pub network_type: Option<String>,
    pub hardware_reservation_id: Option<String>,
    pub ipv4: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Create a device. The provider deduplicates on `idempotency_key`.
    async fn create(
        &self,
        idempotency_key: &str,
        request: &DeviceCreate,
    ) -> Result<ProviderDevice, ProviderError>;

    /// `Ok(None)` when the device does not exist.
    async fn get(&self, id: &str) -> Result<Option<ProviderDevice>, ProviderError>;

    async fn update(&self, id: &str, patch: &DevicePatch) -> Result<ProviderDevice, ProviderError>;

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, ProviderError>;
}

// =============================================================================
// Assignments
// =============================================================================

/// Attach a virtual network to the named port of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentCreate {
    pub device_id: String,
    pub port_name: String,
    pub virtual_network_id: String,
}

/// An attachment as reported by the provider. `id` is `{port}:{vnid}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderAssignment {
    pub id: String,
    pub port_id: String,
    pub device_id: Option<String>,
    pub virtual_network_id: String,
    pub state: String,
}

impl ProviderAssignment {
    pub fn external_id(port_id: &str, virtual_network_id: &str) -> String {
        format!("{port_id}:{virtual_network_id}")
    }

    /// Split an external id into `(port, vnid)`.
    pub fn parse_external_id(id: &str) -> Option<(&str, &str)> {
        id.split_once(':')
            .filter(|(port, vnid)| !port.is_empty() && !vnid.is_empty())
    }
}

/// Assignments have no mutable fields, so there is no update call.
#[async_trait]
pub trait AssignmentApi: Send + Sync {
    async fn create(
        &self,
        idempotency_key: &str,
        request: &AssignmentCreate,
    ) -> Result<ProviderAssignment, ProviderError>;

    async fn get(&self, id: &str) -> Result<Option<ProviderAssignment>, ProviderError>;

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_external_id() {
        let id = ProviderAssignment::external_id("port-1", "vn-9");
        assert_eq!(id, "port-1:vn-9");
        assert_eq!(
            ProviderAssignment::parse_external_id(&id),
            Some(("port-1", "vn-9"))
        );
        assert_eq!(ProviderAssignment::parse_external_id("port-1"), None);
        assert_eq!(ProviderAssignment::parse_external_id(":vn"), None);
    }

    #[test]
    fn test_empty_patch() {
        assert!(DevicePatch::default().is_empty());
        let patch = DevicePatch {
            locked: Some(true),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({"locked": true})
        );
    }
}
