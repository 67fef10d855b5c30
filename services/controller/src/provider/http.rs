//! HTTP client for the provider API.
//!
//! Status mapping:
//! - 404 → `NotFound` (`None` from `get`, `AlreadyAbsent` from `delete`)
//! - 429, 5xx, connection errors → `Transient`
//! - other 4xx → `Rejected`
//! - client timeout → `Timeout`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    AssignmentApi, AssignmentCreate, DeleteOutcome, DeviceApi, DeviceCreate, DevicePatch,
    ProviderAssignment, ProviderDevice, ProviderError,
};
use crate::config::ProviderConfig;
use crate::secrets::CredentialSource;

const AUTH_HEADER: &str = "X-Auth-Token";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    timeout: Duration,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpProvider {
    pub fn new(
        config: &ProviderConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("metal-controller/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transient(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            timeout: config.timeout,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ProviderError> {
        let token = self
            .credentials
            .token()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let response = request
            .header(AUTH_HEADER, token)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        check_status(response).await
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transient(err.to_string())
        }
    }

    async fn fetch_port(&self, port_id: &str) -> Result<Option<PortWire>, ProviderError> {
        let request = self.client.get(self.url(&format!("/ports/{port_id}")));
        match self.send(request).await {
            Ok(response) => Ok(Some(decode(response).await?)),
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    debug!(status = %status, message = %message, "provider returned error");

    Err(match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::Transient(format!("status {}: {message}", status.as_u16()))
        }
        s if s.is_client_error() => ProviderError::Rejected {
            status: s.as_u16(),
            message,
        },
        s => ProviderError::Transient(format!("status {}: {message}", s.as_u16())),
    })
}

/// The API reports errors as `{"errors": ["..."]}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        errors: Vec<String>,
        #[serde(default)]
        error: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        Ok(ErrorBody {
            error: Some(error), ..
        }) => error,
        _ => body.trim().to_string(),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    response
        .json()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

/// `customdata` is a JSON object on the wire but a string in the record.
fn custom_data_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct Slug {
    #[serde(default)]
    slug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Code {
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Link {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    href: Option<String>,
}

impl Link {
    /// Id, or the last segment of the href.
    fn id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or_else(|| self.href.as_deref().and_then(|h| h.rsplit('/').next()))
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct IpAddressWire {
    address: String,
    #[serde(default)]
    address_family: u8,
    #[serde(default)]
    public: bool,
}

#[derive(Debug, Deserialize)]
struct DeviceWire {
    id: String,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    provisioning_percentage: Option<f64>,
    #[serde(default)]
    plan: Option<Slug>,
    #[serde(default)]
    operating_system: Option<Slug>,
    #[serde(default)]
    facility: Option<Code>,
    #[serde(default)]
    metro: Option<Code>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    billing_cycle: Option<String>,
    #[serde(default)]
    userdata: Option<String>,
    #[serde(default)]
    customdata: Option<serde_json::Value>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    ipxe_script_url: Option<String>,
    #[serde(default)]
    always_pxe: bool,
    #[serde(default)]
    network_type: Option<String>,
    #[serde(default)]
    hardware_reservation: Option<Link>,
    #[serde(default)]
    ip_addresses: Vec<IpAddressWire>,
    #[serde(default)]
    network_ports: Vec<PortWire>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<DeviceWire> for ProviderDevice {
    fn from(wire: DeviceWire) -> Self {
        let ipv4 = wire
            .ip_addresses
            .iter()
            .find(|ip| ip.public && ip.address_family == 4)
            .map(|ip| ip.address.clone());
        let customdata = wire.customdata.and_then(|v| match v {
            serde_json::Value::Null => None,
            serde_json::Value::Object(ref m) if m.is_empty() => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });

        Self {
            id: wire.id,
            href: wire.href,
            state: wire.state,
            provision_percentage: wire.provisioning_percentage,
            plan: wire.plan.and_then(|p| p.slug),
            operating_system: wire.operating_system.and_then(|o| o.slug),
            facility: wire.facility.and_then(|f| f.code),
            metro: wire.metro.and_then(|m| m.code),
            hostname: wire.hostname,
            description: wire.description,
            billing_cycle: wire.billing_cycle,
            userdata: wire.userdata.filter(|u| !u.is_empty()),
            customdata,
            tags: wire.tags,
            locked: wire.locked,
            ipxe_script_url: wire.ipxe_script_url.filter(|u| !u.is_empty()),
            always_pxe: wire.always_pxe,
            network_type: wire.network_type,
            hardware_reservation_id: wire
                .hardware_reservation
                .as_ref()
                .and_then(Link::id)
                .map(str::to_string),
            ipv4,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PortWire {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    virtual_networks: Vec<Link>,
}

impl PortWire {
    fn has_network(&self, vnid: &str) -> bool {
        self.virtual_networks.iter().any(|vn| vn.id() == Some(vnid))
    }

    fn assignment(&self, device_id: Option<String>, vnid: &str, state: &str) -> ProviderAssignment {
        ProviderAssignment {
            id: ProviderAssignment::external_id(&self.id, vnid),
            port_id: self.id.clone(),
            device_id,
            virtual_network_id: vnid.to_string(),
            state: state.to_string(),
        }
    }
}

// =============================================================================
// Devices
// =============================================================================

#[async_trait]
impl DeviceApi for HttpProvider {
    async fn create(
        &self,
        idempotency_key: &str,
        request: &DeviceCreate,
    ) -> Result<ProviderDevice, ProviderError> {
        let mut body = serde_json::to_value(request)
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        if let (Some(raw), Some(obj)) = (request.customdata.as_deref(), body.as_object_mut()) {
            obj.insert("customdata".into(), custom_data_value(raw));
        }

        let url = self.url(&format!("/projects/{}/devices", self.project_id));
        debug!(url = %url, plan = %request.plan, "creating device");

        let response = self
            .send(
                self.client
                    .post(url)
                    .header(IDEMPOTENCY_HEADER, idempotency_key)
                    .json(&body),
            )
            .await?;
        let wire: DeviceWire = decode(response).await?;
        Ok(wire.into())
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderDevice>, ProviderError> {
        let request = self.client.get(self.url(&format!("/devices/{id}")));
        match self.send(request).await {
            Ok(response) => {
                let wire: DeviceWire = decode(response).await?;
                Ok(Some(wire.into()))
            }
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update(&self, id: &str, patch: &DevicePatch) -> Result<ProviderDevice, ProviderError> {
        let mut body =
            serde_json::to_value(patch).map_err(|e| ProviderError::Decode(e.to_string()))?;
        if let (Some(raw), Some(obj)) = (patch.customdata.as_deref(), body.as_object_mut()) {
            obj.insert("customdata".into(), custom_data_value(raw));
        }

        let request = self
            .client
            .put(self.url(&format!("/devices/{id}")))
            .json(&body);
        let wire: DeviceWire = decode(self.send(request).await?).await?;
        Ok(wire.into())
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, ProviderError> {
        let request = self.client.delete(self.url(&format!("/devices/{id}")));
        match self.send(request).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(ProviderError::NotFound(_)) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Assignments
// =============================================================================

#[derive(serde::Serialize)]
struct VnidBody<'a> {
    vnid: &'a str,
}

#[async_trait]
impl AssignmentApi for HttpProvider {
    async fn create(
        &self,
        idempotency_key: &str,
        request: &AssignmentCreate,
    ) -> Result<ProviderAssignment, ProviderError> {
        let device_url = self.url(&format!("/devices/{}", request.device_id));
        let response = self
            .send(
                self.client
                    .get(device_url)
                    .query(&[("include", "network_ports")]),
            )
            .await?;
        let device: DeviceWire = decode(response).await?;

        let port = device
            .network_ports
            .iter()
            .find(|p| p.name == request.port_name)
            .ok_or_else(|| ProviderError::Rejected {
                status: 422,
                message: format!(
                    "device {} has no port named {}",
                    request.device_id, request.port_name
                ),
            })?;

        if port.has_network(&request.virtual_network_id) {
            return Ok(port.assignment(
                Some(request.device_id.clone()),
                &request.virtual_network_id,
                metal_api::assignment_state::ASSIGNED,
            ));
        }

        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/ports/{}/assign", port.id)))
                    .header(IDEMPOTENCY_HEADER, idempotency_key)
                    .json(&VnidBody {
                        vnid: &request.virtual_network_id,
                    }),
            )
            .await?;
        let updated: PortWire = decode(response).await?;

        let state = if updated.has_network(&request.virtual_network_id) {
            metal_api::assignment_state::ASSIGNED
        } else {
            metal_api::assignment_state::ASSIGNING
        };
        Ok(updated.assignment(
            Some(request.device_id.clone()),
            &request.virtual_network_id,
            state,
        ))
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderAssignment>, ProviderError> {
        let Some((port_id, vnid)) = ProviderAssignment::parse_external_id(id) else {
            warn!(external_name = %id, "malformed assignment id");
            return Ok(None);
        };
        // The port lists the network only once the attach completes.
        Ok(self.fetch_port(port_id).await?.map(|port| {
            let state = if port.has_network(vnid) {
                metal_api::assignment_state::ASSIGNED
            } else {
                metal_api::assignment_state::ASSIGNING
            };
            port.assignment(None, vnid, state)
        }))
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, ProviderError> {
        let Some((port_id, vnid)) = ProviderAssignment::parse_external_id(id) else {
            return Ok(DeleteOutcome::AlreadyAbsent);
        };
        match self.fetch_port(port_id).await? {
            Some(port) if port.has_network(vnid) => {}
            _ => return Ok(DeleteOutcome::AlreadyAbsent),
        }

        let request = self
            .client
            .post(self.url(&format!("/ports/{port_id}/unassign")))
            .json(&VnidBody { vnid });
        match self.send(request).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(ProviderError::NotFound(_)) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(error_message(r#"{"errors":["a","b"]}"#), "a; b");
        assert_eq!(error_message(r#"{"error":"nope"}"#), "nope");
        assert_eq!(error_message("  gateway timeout \n"), "gateway timeout");
    }

    #[test]
    fn test_device_wire_mapping() {
        let wire: DeviceWire = serde_json::from_value(serde_json::json!({
            "id": "abc123",
            "state": "active",
            "plan": {"slug": "c3.small.x86"},
            "operating_system": {"slug": "ubuntu_20_04"},
            "metro": {"code": "da"},
            "hostname": "srv-001",
            "customdata": {"a": 1},
            "hardware_reservation": {"href": "/metal/v1/hardware-reservations/hr-1"},
            "ip_addresses": [
                {"address": "10.0.0.2", "address_family": 4, "public": false},
                {"address": "2604::1", "address_family": 6, "public": true},
                {"address": "147.75.1.2", "address_family": 4, "public": true}
            ]
        }))
        .unwrap();
        let device = ProviderDevice::from(wire);

        assert_eq!(device.plan.as_deref(), Some("c3.small.x86"));
        assert_eq!(device.metro.as_deref(), Some("da"));
        assert_eq!(device.ipv4.as_deref(), Some("147.75.1.2"));
        assert_eq!(device.customdata.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(device.hardware_reservation_id.as_deref(), Some("hr-1"));
        assert!(device.facility.is_none());
    }

    #[test]
    fn test_port_network_match_by_href() {
        let port: PortWire = serde_json::from_value(serde_json::json!({
            "id": "port-1",
            "name": "eth1",
            "virtual_networks": [{"href": "/metal/v1/virtual-networks/vn-9"}]
        }))
        .unwrap();
        assert!(port.has_network("vn-9"));
        assert!(!port.has_network("vn-1"));
    }
}
