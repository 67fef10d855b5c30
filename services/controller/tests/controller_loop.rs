//! The running controller: worker pool, watch handling and fan-out.

mod common;

use std::time::Duration;

use common::{assignment, device, eventually, test_config, Harness};
use metal_api::{AssignmentParameters, Device, Reference};
use metal_controller::config::ControllerConfig;
use metal_controller::provider::{FakeProvider, Operation};
use metal_reconcile::BackoffPolicy;
use tokio::sync::watch;
use tokio::task::JoinHandle;

fn start(h: &Harness) -> (watch::Sender<bool>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(h.worker.clone().run(rx));
    (tx, handle)
}

#[tokio::test(start_paused = true)]
async fn test_one_create_under_concurrent_edits() {
    let h = Harness::build(
        FakeProvider::new().with_latency(Duration::from_millis(50)),
        test_config(),
    );
    let (shutdown, handle) = start(&h);

    h.create(&device("db-1")).await;
    for i in 0..5 {
        h.edit::<Device>("db-1", |d| {
            d.spec.for_provider.description = Some(format!("rev {i}"));
        })
        .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    eventually(|| async {
        h.try_device("db-1")
            .await
            .is_some_and(|d| d.spec.resource.external_name.is_some())
    })
    .await;

    assert_eq!(h.fake.max_concurrent_creates(), 1);
    assert_eq!(h.fake.device_count(), 1);

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_device_creation_wakes_waiting_assignment() {
    // Backoff far beyond the test horizon: only fan-out can wake the
    // assignment in time.
    let config = ControllerConfig {
        transition_interval: Duration::from_secs(1),
        backoff: BackoffPolicy {
            base: Duration::from_secs(3600),
            max: Duration::from_secs(3600),
            jitter: 0.0,
        },
        ..test_config()
    };
    let h = Harness::build(FakeProvider::new(), config);

    h.create(&assignment(
        "db-eth1",
        AssignmentParameters {
            name: "eth1".into(),
            device_id_ref: Some(Reference::new("db-1")),
            virtual_network_id: Some("vn-9".into()),
            ..Default::default()
        },
    ))
    .await;
    let (shutdown, handle) = start(&h);

    eventually(|| async {
        h.try_assignment("db-eth1")
            .await
            .is_some_and(|a| !a.status.resource.conditions.is_empty())
    })
    .await;
    assert_eq!(h.fake.calls(Operation::CreateAssignment), 0);

    h.fake.queue_device_id("abc123");
    h.create(&device("db-1")).await;

    // Known to the provider but still queued: not usable yet.
    eventually(|| async {
        h.try_device("db-1")
            .await
            .is_some_and(|d| d.spec.resource.external_name.is_some())
    })
    .await;
    assert_eq!(h.fake.calls(Operation::CreateAssignment), 0);

    // The device's next status write is what wakes the assignment.
    h.fake.activate("abc123", "147.75.1.2");
    eventually(|| async {
        h.try_assignment("db-eth1")
            .await
            .is_some_and(|a| a.spec.resource.external_name.is_some())
    })
    .await;
    let a = h.assignment("db-eth1").await;
    assert_eq!(a.spec.for_provider.device_id.as_deref(), Some("abc123"));

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deleted_record_is_finalized() {
    let h = Harness::build(FakeProvider::new().with_initial_state("active"), test_config());
    h.fake.queue_device_id("abc123");
    let (shutdown, handle) = start(&h);

    h.create(&device("db-1")).await;
    eventually(|| async { h.fake.device("abc123").is_some() }).await;

    h.request_delete(metal_api::Kind::Device, "db-1").await;
    eventually(|| async { h.try_device("db-1").await.is_none() }).await;
    assert!(h.fake.device("abc123").is_none());
    assert_eq!(h.fake.calls(Operation::DeleteDevice), 1);

    shutdown.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let h = Harness::new();
    let (shutdown, handle) = start(&h);

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("controller did not stop")
        .unwrap();
    assert!(h.worker.queue().is_empty());
}
