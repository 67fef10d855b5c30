//! HTTP provider against a mock API server.

use std::sync::Arc;
use std::time::Duration;

use metal_controller::config::ProviderConfig;
use metal_controller::provider::{
    AssignmentApi, AssignmentCreate, DeleteOutcome, DeviceApi, DeviceCreate, DevicePatch,
    HttpProvider, ProviderError,
};
use metal_controller::secrets::StaticToken;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> HttpProvider {
    let config = ProviderConfig {
        api_url: server.uri(),
        project_id: "proj-1".into(),
        timeout: Duration::from_secs(5),
    };
    HttpProvider::new(&config, Arc::new(StaticToken::new("secret-token"))).unwrap()
}

fn device_body(state: &str) -> serde_json::Value {
    json!({
        "id": "abc123",
        "href": "/metal/v1/devices/abc123",
        "state": state,
        "plan": {"slug": "c3.small.x86"},
        "operating_system": {"slug": "ubuntu_20_04"},
        "metro": {"code": "da"},
        "facility": {"code": "da11"},
        "hostname": "srv-001",
        "billing_cycle": "hourly",
        "locked": false,
        "network_type": "layer3",
        "ip_addresses": [
            {"address": "147.75.1.2", "address_family": 4, "public": true}
        ]
    })
}

#[tokio::test]
async fn test_create_device_sends_credentials_and_idempotency_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/projects/proj-1/devices"))
        .and(header("X-Auth-Token", "secret-token"))
        .and(header("Idempotency-Key", "uid-1"))
        .and(body_partial_json(json!({
            "plan": "c3.small.x86",
            "operating_system": "ubuntu_20_04",
            "metro": "da",
            "customdata": {"role": "db"}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(device_body("queued")))
        .expect(1)
        .mount(&server)
        .await;

    let request = DeviceCreate {
        plan: "c3.small.x86".into(),
        operating_system: "ubuntu_20_04".into(),
        metro: Some("da".into()),
        customdata: Some(r#"{"role":"db"}"#.into()),
        ..Default::default()
    };
    let device = DeviceApi::create(&provider(&server), "uid-1", &request)
        .await
        .unwrap();

    assert_eq!(device.id, "abc123");
    assert_eq!(device.state, "queued");
    assert_eq!(device.facility.as_deref(), Some("da11"));
    assert_eq!(device.ipv4.as_deref(), Some("147.75.1.2"));
}

#[tokio::test]
async fn test_get_missing_device_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices/gone"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"errors": ["Not found"]})),
        )
        .mount(&server)
        .await;

    let result = DeviceApi::get(&provider(&server), "gone").await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_status_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/devices/busy"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/devices/throttled"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/devices/abc123"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(json!({"errors": ["billing_cycle is invalid"]})),
        )
        .mount(&server)
        .await;

    let p = provider(&server);
    assert!(matches!(
        DeviceApi::get(&p, "busy").await,
        Err(ProviderError::Transient(msg)) if msg.contains("503")
    ));
    assert!(matches!(
        DeviceApi::get(&p, "throttled").await,
        Err(ProviderError::Transient(_))
    ));

    let patch = DevicePatch {
        billing_cycle: Some("weekly".into()),
        ..Default::default()
    };
    let err = DeviceApi::update(&p, "abc123", &patch).await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::Rejected { status: 422, ref message } if message == "billing_cycle is invalid"
    ));
}

#[tokio::test]
async fn test_update_sends_only_patched_fields() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/devices/abc123"))
        .and(body_json(json!({"locked": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(device_body("active")))
        .expect(1)
        .mount(&server)
        .await;

    let patch = DevicePatch {
        locked: Some(true),
        ..Default::default()
    };
    let device = DeviceApi::update(&provider(&server), "abc123", &patch)
        .await
        .unwrap();
    assert_eq!(device.state, "active");
}

#[tokio::test]
async fn test_delete_device() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/devices/abc123"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/devices/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let p = provider(&server);
    assert_eq!(
        DeviceApi::delete(&p, "abc123").await.unwrap(),
        DeleteOutcome::Deleted
    );
    assert_eq!(
        DeviceApi::delete(&p, "gone").await.unwrap(),
        DeleteOutcome::AlreadyAbsent
    );
}

#[tokio::test]
async fn test_assign_port() {
    let server = MockServer::start().await;
    let mut device = device_body("active");
    device["network_ports"] = json!([
        {"id": "port-0", "name": "bond0", "virtual_networks": []},
        {"id": "port-1", "name": "eth1", "virtual_networks": []}
    ]);
    Mock::given(method("GET"))
        .and(path("/devices/abc123"))
        .and(query_param("include", "network_ports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ports/port-1/assign"))
        .and(header("Idempotency-Key", "uid-2"))
        .and(body_json(json!({"vnid": "vn-9"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "port-1",
            "name": "eth1",
            "virtual_networks": [{"href": "/metal/v1/virtual-networks/vn-9"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = AssignmentCreate {
        device_id: "abc123".into(),
        port_name: "eth1".into(),
        virtual_network_id: "vn-9".into(),
    };
    let assignment = AssignmentApi::create(&provider(&server), "uid-2", &request)
        .await
        .unwrap();

    assert_eq!(assignment.id, "port-1:vn-9");
    assert_eq!(assignment.port_id, "port-1");
    assert_eq!(assignment.device_id.as_deref(), Some("abc123"));
    assert_eq!(assignment.state, "assigned");
}

#[tokio::test]
async fn test_assign_unknown_port_is_rejected() {
    let server = MockServer::start().await;
    let mut device = device_body("active");
    device["network_ports"] = json!([{"id": "port-0", "name": "bond0"}]);
    Mock::given(method("GET"))
        .and(path("/devices/abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(device))
        .mount(&server)
        .await;

    let request = AssignmentCreate {
        device_id: "abc123".into(),
        port_name: "eth7".into(),
        virtual_network_id: "vn-9".into(),
    };
    let err = AssignmentApi::create(&provider(&server), "uid-2", &request)
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Rejected { status: 422, .. }));
}

#[tokio::test]
async fn test_get_and_unassign() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ports/port-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "port-1",
            "name": "eth1",
            "virtual_networks": [{"id": "vn-9"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ports/port-1/unassign"))
        .and(body_json(json!({"vnid": "vn-9"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "port-1",
            "name": "eth1",
            "virtual_networks": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let p = provider(&server);
    let found = AssignmentApi::get(&p, "port-1:vn-9").await.unwrap().unwrap();
    assert_eq!(found.virtual_network_id, "vn-9");
    assert_eq!(found.state, "assigned");
    assert!(AssignmentApi::get(&p, "garbage").await.unwrap().is_none());

    assert_eq!(
        AssignmentApi::delete(&p, "port-1:vn-9").await.unwrap(),
        DeleteOutcome::Deleted
    );
    // Port no longer carries vn-10, so nothing is sent.
    assert_eq!(
        AssignmentApi::delete(&p, "port-1:vn-10").await.unwrap(),
        DeleteOutcome::AlreadyAbsent
    );
}

#[tokio::test]
async fn test_pending_attach_reads_as_assigning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ports/port-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "port-1",
            "name": "eth1",
            "virtual_networks": [{"id": "vn-9"}]
        })))
        .mount(&server)
        .await;

    let p = provider(&server);
    let pending = AssignmentApi::get(&p, "port-1:vn-10").await.unwrap().unwrap();
    assert_eq!(pending.state, "assigning");
    assert_eq!(pending.port_id, "port-1");
    assert_eq!(pending.virtual_network_id, "vn-10");

    // No such port at all.
    assert!(AssignmentApi::get(&p, "port-2:vn-10").await.unwrap().is_none());
}
