//! Assignment-specific reconcile behavior.

use std::sync::Arc;

use async_trait::async_trait;
use metal_api::{Assignment, AssignmentObservation, Kind};

use super::observe::assignment_state;
use super::{resolve_reference, Drift, ExternalClient, LateInit, Lifecycle, ReferenceField};
use crate::error::ReconcileError;
use crate::provider::{
    AssignmentApi, AssignmentCreate, DeleteOutcome, ProviderAssignment, ProviderError,
};
use crate::store::ObjectStore;

/// Concrete identities an assignment attaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAssignment {
    pub device_id: String,
    pub virtual_network_id: String,
}

pub struct AssignmentClient {
    api: Arc<dyn AssignmentApi>,
    store: Arc<dyn ObjectStore>,
}

impl AssignmentClient {
    pub fn new(api: Arc<dyn AssignmentApi>, store: Arc<dyn ObjectStore>) -> Self {
        Self { api, store }
    }
}

#[async_trait]
impl ExternalClient for AssignmentClient {
    type Object = Assignment;
    type Resolved = ResolvedAssignment;
    type Observed = ProviderAssignment;

    fn validate(&self, obj: &Assignment) -> Result<(), ReconcileError> {
        if obj.spec.for_provider.name.trim().is_empty() {
            return Err(ReconcileError::InvalidSpec("name (port) is required".into()));
        }
        Ok(())
    }

    async fn resolve(&self, obj: &mut Assignment) -> Result<ResolvedAssignment, ReconcileError> {
        let p = &mut obj.spec.for_provider;

        let device_id = resolve_reference(
            self.store.as_ref(),
            Kind::Device,
            ReferenceField {
                field: "deviceId",
                value: &mut p.device_id,
                reference: &mut p.device_id_ref,
                selector: p.device_id_selector.as_ref(),
            },
        )
        .await?;

        let virtual_network_id = resolve_reference(
            self.store.as_ref(),
            Kind::VirtualNetwork,
            ReferenceField {
                field: "virtualNetworkId",
                value: &mut p.virtual_network_id,
                reference: &mut p.virtual_network_id_ref,
                selector: p.virtual_network_id_selector.as_ref(),
            },
        )
        .await?;

        Ok(ResolvedAssignment {
            device_id,
            virtual_network_id,
        })
    }

    async fn create(
        &self,
        obj: &Assignment,
        resolved: &ResolvedAssignment,
        idempotency_key: &str,
    ) -> Result<(String, ProviderAssignment), ProviderError> {
        let request = AssignmentCreate {
            device_id: resolved.device_id.clone(),
            port_name: obj.spec.for_provider.name.clone(),
            virtual_network_id: resolved.virtual_network_id.clone(),
        };
        let assignment = self.api.create(idempotency_key, &request).await?;
        Ok((assignment.id.clone(), assignment))
    }

    async fn get(&self, external_name: &str) -> Result<Option<ProviderAssignment>, ProviderError> {
        self.api.get(external_name).await
    }

    /// Every assignment field is immutable, so the engine never has mutable
    /// drift to push.
    async fn update(
        &self,
        external_name: &str,
        _obj: &Assignment,
        _resolved: &ResolvedAssignment,
        _drift: &Drift,
    ) -> Result<ProviderAssignment, ProviderError> {
        self.api
            .get(external_name)
            .await?
            .ok_or_else(|| ProviderError::NotFound(external_name.to_string()))
    }

    async fn delete(&self, external_name: &str) -> Result<DeleteOutcome, ProviderError> {
        self.api.delete(external_name).await
    }

    fn observe(&self, obj: &mut Assignment, observed: &ProviderAssignment) -> Lifecycle {
        let (ready, lifecycle) = assignment_state(&observed.state);
        obj.status.at_provider = AssignmentObservation {
            id: observed.id.clone(),
            port_id: Some(observed.port_id.clone()),
            device_id: observed
                .device_id
                .clone()
                .or_else(|| obj.status.at_provider.device_id.clone()),
            virtual_network_id: Some(observed.virtual_network_id.clone()),
            state: Some(observed.state.clone()),
        };
        obj.status.resource.conditions.set(ready);
        lifecycle
    }

    fn late_initialize(&self, _obj: &mut Assignment, _observed: &ProviderAssignment) -> LateInit {
        LateInit::new()
    }

    fn diff(
        &self,
        _obj: &Assignment,
        resolved: &ResolvedAssignment,
        observed: &ProviderAssignment,
    ) -> Drift {
        let mut drift = Drift::new();
        drift.check_immutable(
            "virtualNetworkId",
            Some(resolved.virtual_network_id.as_str()),
            Some(observed.virtual_network_id.as_str()),
        );
        drift.check_immutable(
            "deviceId",
            Some(resolved.device_id.as_str()),
            observed.device_id.as_deref(),
        );
        drift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FakeProvider;
    use crate::store::MemoryStore;
    use metal_api::{AssignmentParameters, Reference};

    fn client() -> AssignmentClient {
        AssignmentClient::new(Arc::new(FakeProvider::new()), Arc::new(MemoryStore::new()))
    }

    fn assignment() -> Assignment {
        Assignment::new(
            "db-eth1",
            AssignmentParameters {
                name: "eth1".into(),
                device_id: Some("abc123".into()),
                virtual_network_id: Some("vn-9".into()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_raw_ids_need_no_store() {
        let c = client();
        let mut a = assignment();
        a.spec.for_provider.device_id_ref = Some(Reference::new("missing"));

        let resolved = c.resolve(&mut a).await.unwrap();
        assert_eq!(resolved.device_id, "abc123");
        assert_eq!(resolved.virtual_network_id, "vn-9");
    }

    #[test]
    fn test_changed_network_is_immutable_drift() {
        let c = client();
        let observed = ProviderAssignment {
            id: "port-1:vn-1".into(),
            port_id: "port-1".into(),
            device_id: None,
            virtual_network_id: "vn-1".into(),
            state: "assigned".into(),
        };
        let resolved = ResolvedAssignment {
            device_id: "abc123".into(),
            virtual_network_id: "vn-9".into(),
        };

        let drift = c.diff(&assignment(), &resolved, &observed);
        assert_eq!(drift.immutable, ["virtualNetworkId"]);
        assert!(drift.mutable.is_empty());
    }

    #[test]
    fn test_validate_requires_port() {
        let c = client();
        let mut a = assignment();
        a.spec.for_provider.name = " ".into();
        assert!(matches!(c.validate(&a), Err(ReconcileError::InvalidSpec(_))));
    }
}
