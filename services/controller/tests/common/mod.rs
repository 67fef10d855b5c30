//! Shared harness: a worker wired to an in-memory store and a fake provider.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use metal_api::{
    Assignment, AssignmentParameters, ConditionStatus, ConditionType, Device, DeviceParameters,
    Kind, Managed, ObjectKey, Resource,
};
use metal_controller::config::ControllerConfig;
use metal_controller::provider::FakeProvider;
use metal_controller::reconciler::ControllerWorker;
use metal_controller::secrets::StaticDataSource;
use metal_controller::store::{MemoryStore, ObjectStore, ObjectStoreExt, StoreError};
use metal_reconcile::{Action, BackoffPolicy};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub fake: Arc<FakeProvider>,
    pub data: Arc<StaticDataSource>,
    pub worker: Arc<ControllerWorker>,
    pub config: ControllerConfig,
}

/// Deterministic timings for tests.
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        workers: 4,
        poll_interval: Duration::from_secs(60),
        transition_interval: Duration::from_secs(10),
        backoff: BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
            jitter: 0.0,
        },
        provider_timeout: Duration::from_secs(30),
        create_grace: Duration::from_secs(60),
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::build(FakeProvider::new(), test_config())
    }

    pub fn build(fake: FakeProvider, config: ControllerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let fake = Arc::new(fake);
        let data = Arc::new(StaticDataSource::new());
        let worker = Arc::new(ControllerWorker::new(
            store.clone(),
            fake.clone(),
            fake.clone(),
            data.clone(),
            config.clone(),
        ));
        Self {
            store,
            fake,
            data,
            worker,
            config,
        }
    }

    pub async fn reconcile_device(&self, name: &str) -> Action {
        self.worker
            .reconcile_key(&ObjectKey::new(Kind::Device, name))
            .await
    }

    pub async fn reconcile_assignment(&self, name: &str) -> Action {
        self.worker
            .reconcile_key(&ObjectKey::new(Kind::Assignment, name))
            .await
    }

    pub async fn create<R: Resource>(&self, record: &R) -> R {
        self.store.create_typed(record).await.unwrap()
    }

    pub async fn device(&self, name: &str) -> Device {
        self.store.get_typed(name).await.unwrap().unwrap()
    }

    pub async fn try_device(&self, name: &str) -> Option<Device> {
        self.store.get_typed(name).await.unwrap()
    }

    pub async fn assignment(&self, name: &str) -> Assignment {
        self.store.get_typed(name).await.unwrap().unwrap()
    }

    pub async fn try_assignment(&self, name: &str) -> Option<Assignment> {
        self.store.get_typed(name).await.unwrap()
    }

    /// Read-modify-write, retrying on conflict like a user client would.
    pub async fn edit<R: Resource>(&self, name: &str, f: impl Fn(&mut R)) -> R {
        loop {
            let mut record: R = self.store.get_typed(name).await.unwrap().unwrap();
            f(&mut record);
            match self.store.update_typed(&record).await {
                Ok(updated) => return updated,
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => panic!("edit failed: {e}"),
            }
        }
    }

    pub async fn request_delete(&self, kind: Kind, name: &str) {
        self.store
            .delete(&ObjectKey::new(kind, name))
            .await
            .unwrap();
    }
}

pub fn device_params() -> DeviceParameters {
    DeviceParameters {
        metro: Some("da".into()),
        ..DeviceParameters::new("c3.small.x86", "ubuntu_20_04")
    }
}

pub fn device(name: &str) -> Device {
    Device::new(name, device_params())
}

pub fn assignment(name: &str, params: AssignmentParameters) -> Assignment {
    Assignment::new(name, params)
}

pub fn condition<R: Managed>(record: &R, type_: ConditionType) -> (ConditionStatus, String) {
    let c = record
        .conditions()
        .get(type_)
        .unwrap_or_else(|| panic!("missing {type_:?} condition"));
    (c.status, c.reason.clone())
}

/// Poll `check` until it holds, letting the (paused) clock advance.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
