//! Reconciliation core.
//!
//! A turn for one record runs:
//!
//! ```text
//! resolve references -> no external name? create
//!                    -> get -> observe -> late-init -> diff -> update | no-op
//! deletion mark      -> (Delete policy) gated provider delete -> drop finalizer
//! ```
//!
//! The [`Reconciler`] drives that sequence for any kind through the
//! [`ExternalClient`] trait; [`DeviceClient`] and [`AssignmentClient`] supply
//! the per-kind pieces. [`ControllerWorker`] owns the work queue and the
//! worker pool.

mod assignment;
mod device;
mod diff;
mod engine;
mod late_init;
mod observe;
mod resolve;
mod worker;

pub use assignment::AssignmentClient;
pub use device::DeviceClient;
pub use diff::Drift;
pub use engine::{Outcome, Reconciler};
pub use late_init::LateInit;
pub use observe::Lifecycle;
pub use resolve::{resolve_data_key, resolve_reference, ReferenceField};
pub use worker::ControllerWorker;

use async_trait::async_trait;
use metal_api::Managed;

use crate::error::ReconcileError;
use crate::provider::{DeleteOutcome, ProviderError};

/// Finalizer that blocks record removal until external cleanup is done.
pub const FINALIZER: &str = "finalizer.metal.reconciler/managed";

/// Per-kind behavior plugged into the generic [`Reconciler`].
#[async_trait]
pub trait ExternalClient: Send + Sync + 'static {
    type Object: Managed + PartialEq;

    /// Values resolved for this turn only (references, data keys).
    type Resolved: Send + Sync;

    /// The provider's view of the external resource.
    type Observed: Send + Sync;

    /// Structural checks run before create.
    fn validate(&self, obj: &Self::Object) -> Result<(), ReconcileError>;

    /// Resolve references. Resolved immutable identities are written back
    /// onto `obj` so they are only looked up once.
    async fn resolve(&self, obj: &mut Self::Object) -> Result<Self::Resolved, ReconcileError>;

    async fn create(
        &self,
        obj: &Self::Object,
        resolved: &Self::Resolved,
        idempotency_key: &str,
    ) -> Result<(String, Self::Observed), ProviderError>;

    async fn get(&self, external_name: &str) -> Result<Option<Self::Observed>, ProviderError>;

    /// Push the mutable fields named in `drift`.
    async fn update(
        &self,
        external_name: &str,
        obj: &Self::Object,
        resolved: &Self::Resolved,
        drift: &Drift,
    ) -> Result<Self::Observed, ProviderError>;

    async fn delete(&self, external_name: &str) -> Result<DeleteOutcome, ProviderError>;

    /// Write `atProvider` and the `Ready` condition.
    fn observe(&self, obj: &mut Self::Object, observed: &Self::Observed) -> Lifecycle;

    /// Fill unset optional parameters from the observation.
    fn late_initialize(&self, obj: &mut Self::Object, observed: &Self::Observed) -> LateInit;

    fn diff(&self, obj: &Self::Object, resolved: &Self::Resolved, observed: &Self::Observed)
        -> Drift;

    /// Immutable parameters the provider never reports back, by field name.
    /// Hashed at creation to detect later edits.
    fn unobserved_immutables(&self, _obj: &Self::Object) -> Vec<(&'static str, serde_json::Value)> {
        Vec::new()
    }
}
