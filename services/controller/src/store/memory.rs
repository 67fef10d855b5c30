//! In-memory record store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use metal_api::{DynamicObject, Kind, ObjectKey, Selector};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use ulid::Ulid;

use super::{ObjectStore, StoreError, WatchEvent};

const EVENT_BUFFER: usize = 1024;

/// Store backed by a map, with the write semantics of an API server:
/// server-assigned uids, generation bumped on spec changes only,
/// resourceVersion bumped on every accepted write, and finalizer-gated
/// deletion.
pub struct MemoryStore {
    objects: RwLock<BTreeMap<ObjectKey, DynamicObject>>,
    events: broadcast::Sender<WatchEvent>,
    version: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
            version: AtomicU64::new(0),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, event: WatchEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn applied(obj: &DynamicObject) -> WatchEvent {
        WatchEvent::Applied {
            key: obj.key(),
            generation: obj.metadata.generation,
            deleting: obj.metadata.is_deleting(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list(
        &self,
        kind: Kind,
        selector: Option<&Selector>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let objects = self.objects.read().await;
        Ok(objects
            .values()
            .filter(|obj| obj.kind == kind)
            .filter(|obj| selector.map_or(true, |s| s.matches(&obj.metadata.labels)))
            .cloned()
            .collect())
    }

    async fn create(&self, mut obj: DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = obj.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        obj.metadata.uid = Some(Ulid::new().to_string());
        obj.metadata.generation = 1;
        obj.metadata.resource_version = self.next_version();
        obj.metadata.creation_timestamp = Some(Utc::now());
        obj.metadata.deletion_timestamp = None;

        objects.insert(key.clone(), obj.clone());
        drop(objects);

        debug!(key = %key, "record created");
        self.emit(Self::applied(&obj));
        Ok(obj)
    }

    async fn update(&self, mut obj: DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = obj.key();
        let mut objects = self.objects.write().await;
        let existing = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if obj.metadata.resource_version != existing.metadata.resource_version {
            return Err(StoreError::Conflict {
                key,
                expected: obj.metadata.resource_version,
                actual: existing.metadata.resource_version,
            });
        }

        // Server-owned metadata.
        obj.metadata.uid = existing.metadata.uid.clone();
        obj.metadata.creation_timestamp = existing.metadata.creation_timestamp;
        obj.metadata.deletion_timestamp = existing.metadata.deletion_timestamp;
        obj.metadata.generation = existing.metadata.generation;

        if obj.spec == existing.spec
            && obj.status == existing.status
            && obj.metadata.labels == existing.metadata.labels
            && obj.metadata.finalizers == existing.metadata.finalizers
        {
            return Ok(existing.clone());
        }

        if obj.spec != existing.spec {
            obj.metadata.generation += 1;
        }
        obj.metadata.resource_version = self.next_version();

        if obj.metadata.is_deleting() && obj.metadata.finalizers.is_empty() {
            objects.remove(&key);
            drop(objects);
            debug!(key = %key, "last finalizer removed, record deleted");
            self.emit(WatchEvent::Removed { key });
            return Ok(obj);
        }

        objects.insert(key.clone(), obj.clone());
        drop(objects);

        self.emit(Self::applied(&obj));
        Ok(obj)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        let existing = objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if existing.metadata.finalizers.is_empty() {
            objects.remove(key);
            drop(objects);
            debug!(key = %key, "record deleted");
            self.emit(WatchEvent::Removed { key: key.clone() });
            return Ok(());
        }

        if existing.metadata.is_deleting() {
            return Ok(());
        }

        existing.metadata.deletion_timestamp = Some(Utc::now());
        existing.metadata.resource_version = self.next_version();
        let event = Self::applied(existing);
        drop(objects);

        debug!(key = %key, "deletion requested, waiting on finalizers");
        self.emit(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectStoreExt;
    use metal_api::{Device, DeviceParameters, Resource};

    fn device(name: &str) -> Device {
        Device::new(
            name,
            DeviceParameters {
                metro: Some("da".into()),
                ..DeviceParameters::new("c3.small.x86", "ubuntu_20_04")
            },
        )
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = MemoryStore::new();
        let created = store.create_typed(&device("db-1")).await.unwrap();

        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.generation, 1);
        assert!(created.metadata.resource_version > 0);

        let err = store.create_typed(&device("db-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_generation_tracks_spec_only() {
        let store = MemoryStore::new();
        let mut d = store.create_typed(&device("db-1")).await.unwrap();

        d.status.at_provider.id = "abc".into();
        let d2 = store.update_typed(&d).await.unwrap();
        assert_eq!(d2.metadata.generation, 1);
        assert!(d2.metadata.resource_version > d.metadata.resource_version);

        let mut d3 = d2.clone();
        d3.spec.for_provider.description = Some("db".into());
        let d3 = store.update_typed(&d3).await.unwrap();
        assert_eq!(d3.metadata.generation, 2);
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = MemoryStore::new();
        let d = store.create_typed(&device("db-1")).await.unwrap();

        let mut first = d.clone();
        first.spec.for_provider.description = Some("first".into());
        store.update_typed(&first).await.unwrap();

        let mut stale = d;
        stale.spec.for_provider.description = Some("stale".into());
        let err = store.update_typed(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let stored: Device = store.get_typed("db-1").await.unwrap().unwrap();
        assert_eq!(stored.spec.for_provider.description.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_unchanged_write_is_a_noop() {
        let store = MemoryStore::new();
        let d = store.create_typed(&device("db-1")).await.unwrap();
        let mut events = store.subscribe();

        let same = store.update_typed(&d).await.unwrap();
        assert_eq!(same.metadata.resource_version, d.metadata.resource_version);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = MemoryStore::new();
        let mut d = device("db-1");
        d.metadata.add_finalizer("test/finalizer");
        store.create_typed(&d).await.unwrap();

        store.delete(&d.key()).await.unwrap();
        let mut marked: Device = store.get_typed("db-1").await.unwrap().unwrap();
        assert!(marked.metadata.is_deleting());

        let mut events = store.subscribe();
        marked.metadata.remove_finalizer("test/finalizer");
        store.update_typed(&marked).await.unwrap();

        assert!(store.get_typed::<Device>("db-1").await.unwrap().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            WatchEvent::Removed { key: d.key() }
        );
    }

    #[tokio::test]
    async fn test_list_filters_by_selector() {
        let store = MemoryStore::new();
        let mut a = device("db-1");
        a.metadata = a.metadata.with_label("role", "db");
        store.create_typed(&a).await.unwrap();
        store.create_typed(&device("web-1")).await.unwrap();

        let selector = Selector::labels([("role", "db")]);
        let matched = store.list(Kind::Device, Some(&selector)).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].metadata.name, "db-1");

        assert_eq!(store.list(Kind::Device, None).await.unwrap().len(), 2);
        assert!(store.list(Kind::Assignment, None).await.unwrap().is_empty());
    }
}
