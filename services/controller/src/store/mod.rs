//! Record store seam.
//!
//! The controller only talks to records through [`ObjectStore`]. Writes are
//! guarded by `resourceVersion`; a stale write fails with
//! [`StoreError::Conflict`] and leaves the stored record untouched.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use metal_api::{ApiError, DynamicObject, Kind, ObjectKey, Resource, Selector};
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectKey),

    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),

    #[error("{key} was modified: expected resourceVersion {expected}, found {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("malformed record: {0}")]
    Malformed(String),
}

impl From<ApiError> for StoreError {
    fn from(err: ApiError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Change notification emitted after every accepted write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Applied {
        key: ObjectKey,
        generation: i64,
        deleting: bool,
    },
    Removed {
        key: ObjectKey,
    },
}

impl WatchEvent {
    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::Applied { key, .. } | Self::Removed { key } => key,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, StoreError>;

    /// Records of `kind` matching `selector` (all of them when `None`),
    /// ordered by name.
    async fn list(
        &self,
        kind: Kind,
        selector: Option<&Selector>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    /// Insert a new record. The store assigns uid, generation and
    /// resourceVersion.
    async fn create(&self, obj: DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replace a record. `obj.metadata.resource_version` must match the
    /// stored one. A record that is being deleted and has no finalizers
    /// left is removed.
    async fn update(&self, obj: DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Request deletion. Records without finalizers are removed at once;
    /// others are only marked.
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<WatchEvent>;
}

/// Typed convenience wrappers over [`ObjectStore`].
#[async_trait]
pub trait ObjectStoreExt: ObjectStore {
    async fn get_typed<R: Resource>(&self, name: &str) -> Result<Option<R>, StoreError> {
        match self.get(&ObjectKey::new(R::KIND, name)).await? {
            Some(obj) => Ok(Some(obj.into_typed()?)),
            None => Ok(None),
        }
    }

    async fn create_typed<R: Resource>(&self, record: &R) -> Result<R, StoreError> {
        let created = self.create(record.to_dynamic()?).await?;
        Ok(created.into_typed()?)
    }

    async fn update_typed<R: Resource>(&self, record: &R) -> Result<R, StoreError> {
        let updated = self.update(record.to_dynamic()?).await?;
        Ok(updated.into_typed()?)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStoreExt for S {}
