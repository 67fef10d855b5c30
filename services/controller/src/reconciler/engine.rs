//! Generic convergence engine.
//!
//! One call to [`Reconciler::reconcile`] is one turn for one record: it reads
//! the record, converges the external resource toward it, and writes the
//! record back at most once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metal_api::{Condition, Kind, Managed, ObjectKey, ReclaimPolicy, Resource};
use metal_reconcile::SpecHash;
use tracing::{debug, info, instrument, warn};

use super::{ExternalClient, FINALIZER};
use crate::config::ControllerConfig;
use crate::error::{with_timeout, ReconcileError};
use crate::provider::{DeleteOutcome, ProviderError};
use crate::store::{ObjectStore, StoreError};

/// Attempts at saving a freshly created external name onto a record that
/// changed during the turn.
const REAPPLY_ATTEMPTS: usize = 3;

/// How a successful turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// External resource matches the record (or cannot be made to).
    Converged,
    /// Provider is mid-workflow; look again soon.
    Transitioning,
    /// The record is gone or about to be.
    Removed,
}

pub struct Reconciler<C: ExternalClient> {
    client: C,
    store: Arc<dyn ObjectStore>,
    provider_timeout: Duration,
    create_grace: Duration,
}

impl<C: ExternalClient> Reconciler<C> {
    pub fn new(client: C, store: Arc<dyn ObjectStore>, config: &ControllerConfig) -> Self {
        Self {
            client,
            store,
            provider_timeout: config.provider_timeout,
            create_grace: config.create_grace,
        }
    }

    fn kind() -> Kind {
        <C::Object as Resource>::KIND
    }

    /// Run one turn for the record `name`.
    #[instrument(skip(self), fields(kind = %Self::kind()))]
    pub async fn reconcile(&self, name: &str) -> Result<Outcome, ReconcileError> {
        let key = ObjectKey::new(Self::kind(), name);
        let Some(record) = self.store.get(&key).await? else {
            debug!("record no longer exists");
            return Ok(Outcome::Removed);
        };
        let original: C::Object = record.into_typed()?;
        let mut obj = original.clone();

        let result = self.converge(&mut obj).await;
        if let Err(e) = &result {
            if !e.is_reportable() {
                return result;
            }
            warn!(error = %e, reason = e.reason(), "reconcile failed");
            obj.conditions_mut()
                .set(Condition::reconcile_error(e.reason(), e.to_string()));
        }

        self.persist(&original, &obj).await?;
        result
    }

    async fn converge(&self, obj: &mut C::Object) -> Result<Outcome, ReconcileError> {
        if obj.metadata().is_deleting() {
            return self.finalize(obj).await;
        }
        obj.metadata_mut().add_finalizer(FINALIZER);

        let resolved = self.client.resolve(obj).await?;

        let Some(external_name) = obj.external_name().map(str::to_string) else {
            return self.create(obj, &resolved).await;
        };

        let Some(observed) = self.call(self.client.get(&external_name)).await? else {
            if self.within_create_grace(obj) {
                debug!(external_name = %external_name, "not visible yet after create");
                obj.conditions_mut().set(Condition::creating());
                return Ok(Outcome::Transitioning);
            }
            warn!(external_name = %external_name, "external resource disappeared, recreating");
            return self.create(obj, &resolved).await;
        };

        obj.conditions_mut().set(Condition::reconcile_success());
        let lifecycle = self.client.observe(obj, &observed);

        let late_init = self.client.late_initialize(obj, &observed);
        if late_init.changed() {
            info!(fields = ?late_init.fields(), "adopted provider defaults");
        }

        let mut drift = self.client.diff(obj, &resolved, &observed);
        for field in self.hash_drift(obj) {
            if !drift.immutable.contains(&field) {
                drift.immutable.push(field);
            }
        }

        if !drift.immutable.is_empty() {
            warn!(fields = ?drift.immutable, "immutable fields changed, leaving them alone");
            obj.conditions_mut()
                .set(Condition::immutable_field_changed(&drift.immutable));
        }

        if drift.mutable.is_empty() {
            if drift.immutable.is_empty() {
                obj.conditions_mut().set(Condition::up_to_date());
            }
            return Ok(settled(lifecycle.is_stable()));
        }

        if drift.immutable.is_empty() {
            obj.conditions_mut()
                .set(Condition::update_pending(&drift.mutable));
        }

        if !lifecycle.is_stable() {
            debug!(fields = ?drift.mutable, "update deferred while provider is busy");
            return Ok(Outcome::Transitioning);
        }

        info!(
            external_name = %external_name,
            fields = ?drift.mutable,
            "updating external resource"
        );
        let updated = self
            .call(self.client.update(&external_name, obj, &resolved, &drift))
            .await?;
        let lifecycle = self.client.observe(obj, &updated);
        if drift.immutable.is_empty() {
            obj.conditions_mut().set(Condition::up_to_date());
        }
        Ok(settled(lifecycle.is_stable()))
    }

    async fn create(
        &self,
        obj: &mut C::Object,
        resolved: &C::Resolved,
    ) -> Result<Outcome, ReconcileError> {
        self.client.validate(obj)?;

        let uid = obj
            .metadata()
            .uid
            .clone()
            .unwrap_or_else(|| obj.key().to_string());
        // A lost resource gets a fresh key so the provider does not hand
        // back the one that disappeared.
        let idempotency_key = match obj.external_name() {
            Some(previous) => format!("{uid}/{previous}"),
            None => uid,
        };

        obj.conditions_mut().set(Condition::creating());
        let (external_name, observed) = self
            .call(self.client.create(obj, resolved, &idempotency_key))
            .await?;
        info!(external_name = %external_name, "external resource created");

        let hashes = self
            .client
            .unobserved_immutables(obj)
            .into_iter()
            .map(|(field, value)| (field.to_string(), SpecHash::from_json(&value).to_string()))
            .collect();

        obj.resource_spec_mut().external_name = Some(external_name);
        let status = obj.resource_status_mut();
        status.external_create_succeeded = Some(Utc::now());
        status.immutable_hashes = hashes;
        obj.conditions_mut().set(Condition::reconcile_success());
        self.client.observe(obj, &observed);

        Ok(Outcome::Transitioning)
    }

    async fn finalize(&self, obj: &mut C::Object) -> Result<Outcome, ReconcileError> {
        if !obj.metadata().has_finalizer(FINALIZER) {
            return Ok(Outcome::Removed);
        }
        obj.conditions_mut().set(Condition::deleting());

        match (obj.reclaim_policy(), obj.external_name().map(str::to_string)) {
            (ReclaimPolicy::Retain, external_name) => {
                info!(external_name = ?external_name, "retaining external resource");
            }
            (ReclaimPolicy::Delete, None) => {
                debug!("nothing was created, nothing to delete");
            }
            (ReclaimPolicy::Delete, Some(external_name)) => {
                let Some(observed) = self.call(self.client.get(&external_name)).await? else {
                    debug!(external_name = %external_name, "external resource already gone");
                    return Ok(self.release(obj));
                };

                let lifecycle = self.client.observe(obj, &observed);
                obj.conditions_mut().set(Condition::deleting());
                if !lifecycle.is_stable() {
                    debug!(external_name = %external_name, "delete deferred while provider is busy");
                    return Ok(Outcome::Transitioning);
                }

                match self.call(self.client.delete(&external_name)).await? {
                    DeleteOutcome::Deleted => {
                        info!(external_name = %external_name, "external resource deleted");
                    }
                    DeleteOutcome::AlreadyAbsent => {
                        debug!(external_name = %external_name, "external resource already gone");
                    }
                }
            }
        }

        Ok(self.release(obj))
    }

    fn release(&self, obj: &mut C::Object) -> Outcome {
        obj.conditions_mut().set(Condition::reconcile_success());
        obj.metadata_mut().remove_finalizer(FINALIZER);
        Outcome::Removed
    }

    /// Immutable fields whose stored creation-time hash no longer matches.
    fn hash_drift(&self, obj: &C::Object) -> Vec<&'static str> {
        let stored = &obj.resource_status().immutable_hashes;
        if stored.is_empty() {
            return Vec::new();
        }
        self.client
            .unobserved_immutables(obj)
            .into_iter()
            .filter(|(field, value)| {
                stored
                    .get(*field)
                    .is_some_and(|hash| SpecHash::from_json(value).as_str() != hash)
            })
            .map(|(field, _)| field)
            .collect()
    }

    fn within_create_grace(&self, obj: &C::Object) -> bool {
        let Some(created) = obj.resource_status().external_create_succeeded else {
            return false;
        };
        match Utc::now().signed_duration_since(created).to_std() {
            Ok(age) => age < self.create_grace,
            // Timestamp in the future: clock skew, still fresh.
            Err(_) => true,
        }
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        with_timeout(self.provider_timeout, fut).await
    }

    /// Write the record if the turn changed it.
    async fn persist(&self, original: &C::Object, obj: &C::Object) -> Result<(), ReconcileError> {
        if obj == original {
            return Ok(());
        }
        match self.store.update(obj.to_dynamic()?).await {
            Ok(_) => Ok(()),
            Err(StoreError::Conflict { .. } | StoreError::NotFound(_)) => {
                debug!("record changed during turn, discarding results");
                if obj.external_name().is_some() && obj.external_name() != original.external_name() {
                    self.reapply_external_name(original, obj).await?;
                }
                Err(ReconcileError::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Save a newly created external name onto the latest copy of the record
    /// so the external resource is not orphaned.
    async fn reapply_external_name(
        &self,
        original: &C::Object,
        obj: &C::Object,
    ) -> Result<(), ReconcileError> {
        let external_name = obj.external_name().map(str::to_string);

        for _ in 0..REAPPLY_ATTEMPTS {
            let Some(fresh) = self.store.get(&obj.key()).await? else {
                warn!(
                    external_name = ?external_name,
                    "record removed before its external name was saved; external resource is orphaned"
                );
                return Ok(());
            };
            let mut fresh: C::Object = fresh.into_typed()?;

            if fresh.external_name() == external_name.as_deref() {
                return Ok(());
            }
            if fresh.external_name() != original.external_name() {
                warn!(
                    external_name = ?external_name,
                    current = ?fresh.external_name(),
                    "external name was changed concurrently, not overwriting"
                );
                return Ok(());
            }

            fresh.resource_spec_mut().external_name = external_name.clone();
            let status = fresh.resource_status_mut();
            status.external_create_succeeded = obj.resource_status().external_create_succeeded;
            status.immutable_hashes = obj.resource_status().immutable_hashes.clone();
            fresh.metadata_mut().add_finalizer(FINALIZER);

            match self.store.update(fresh.to_dynamic()?).await {
                Ok(_) => {
                    info!(external_name = ?external_name, "saved external name after conflict");
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        warn!(external_name = ?external_name, "could not save external name, giving up");
        Ok(())
    }
}

fn settled(stable: bool) -> Outcome {
    if stable {
        Outcome::Converged
    } else {
        Outcome::Transitioning
    }
}

