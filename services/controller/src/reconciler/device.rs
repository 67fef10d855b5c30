//! Device-specific reconcile behavior.

use std::sync::Arc;

use async_trait::async_trait;
use metal_api::{Device, DeviceObservation, DeviceState, FACILITY_ANY};

use super::diff::{same_json, same_set};
use super::observe::device_state;
use super::{resolve_data_key, Drift, ExternalClient, LateInit, Lifecycle};
use crate::error::ReconcileError;
use crate::provider::{DeleteOutcome, DeviceApi, DeviceCreate, DevicePatch, ProviderDevice, ProviderError};
use crate::secrets::DataSource;

/// Per-turn values for a device.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    /// Desired userdata, from the inline field or `userdataRef`.
    pub userdata: Option<String>,
}

pub struct DeviceClient {
    api: Arc<dyn DeviceApi>,
    data: Arc<dyn DataSource>,
}

impl DeviceClient {
    pub fn new(api: Arc<dyn DeviceApi>, data: Arc<dyn DataSource>) -> Self {
        Self { api, data }
    }
}

#[async_trait]
impl ExternalClient for DeviceClient {
    type Object = Device;
    type Resolved = ResolvedDevice;
    type Observed = ProviderDevice;

    fn validate(&self, obj: &Device) -> Result<(), ReconcileError> {
        Ok(obj.spec.for_provider.validate()?)
    }

    async fn resolve(&self, obj: &mut Device) -> Result<ResolvedDevice, ReconcileError> {
        let params = &obj.spec.for_provider;
        let userdata = match (&params.userdata, &params.userdata_ref) {
            (Some(inline), _) => Some(inline.clone()),
            (None, Some(selector)) => {
                resolve_data_key(self.data.as_ref(), "userdataRef", selector).await?
            }
            (None, None) => None,
        };
        Ok(ResolvedDevice { userdata })
    }

    async fn create(
        &self,
        obj: &Device,
        resolved: &ResolvedDevice,
        idempotency_key: &str,
    ) -> Result<(String, ProviderDevice), ProviderError> {
        let p = &obj.spec.for_provider;
        let request = DeviceCreate {
            plan: p.plan.clone(),
            operating_system: p.operating_system.clone(),
            facility: p.facility.clone(),
            metro: p.metro.clone(),
            hostname: p.hostname.clone(),
            description: p.description.clone(),
            billing_cycle: p.billing_cycle.clone(),
            userdata: resolved.userdata.clone(),
            tags: p.tags.clone().unwrap_or_default(),
            locked: p.locked,
            ipxe_script_url: p.ipxe_script_url.clone(),
            public_ipv4_subnet_size: p.public_ipv4_subnet_size,
            always_pxe: p.always_pxe,
            hardware_reservation_id: p.hardware_reservation_id.clone(),
            customdata: p.custom_data.clone(),
            user_ssh_keys: p.user_ssh_keys.clone().unwrap_or_default(),
            project_ssh_keys: p.project_ssh_keys.clone().unwrap_or_default(),
            features: p.features.clone().unwrap_or_default(),
            ip_addresses: p.ip_addresses.clone().unwrap_or_default(),
        };
        let device = self.api.create(idempotency_key, &request).await?;
        Ok((device.id.clone(), device))
    }

    async fn get(&self, external_name: &str) -> Result<Option<ProviderDevice>, ProviderError> {
        self.api.get(external_name).await
    }

    async fn update(
        &self,
        external_name: &str,
        obj: &Device,
        resolved: &ResolvedDevice,
        drift: &Drift,
    ) -> Result<ProviderDevice, ProviderError> {
        let p = &obj.spec.for_provider;
        let pick = |field: &str| drift.has_mutable(field);
        let patch = DevicePatch {
            description: p.description.clone().filter(|_| pick("description")),
            billing_cycle: p.billing_cycle.clone().filter(|_| pick("billingCycle")),
            userdata: resolved.userdata.clone().filter(|_| pick("userdata")),
            tags: p.tags.clone().filter(|_| pick("tags")),
            locked: p.locked.filter(|_| pick("locked")),
            ipxe_script_url: p.ipxe_script_url.clone().filter(|_| pick("ipxeScriptUrl")),
            always_pxe: p.always_pxe.filter(|_| pick("alwaysPXE")),
            customdata: p.custom_data.clone().filter(|_| pick("customData")),
        };
        self.api.update(external_name, &patch).await
    }

    async fn delete(&self, external_name: &str) -> Result<DeleteOutcome, ProviderError> {
        self.api.delete(external_name).await
    }

    fn observe(&self, obj: &mut Device, observed: &ProviderDevice) -> Lifecycle {
        let state = DeviceState::parse(&observed.state);
        let (ready, lifecycle) = device_state(&state);

        obj.status.at_provider = DeviceObservation {
            id: observed.id.clone(),
            href: observed.href.clone(),
            facility: observed.facility.clone(),
            metro: observed.metro.clone(),
            state: Some(state),
            provision_percentage: observed.provision_percentage,
            ipv4: observed.ipv4.clone(),
            locked: observed.locked,
            created_at: observed.created_at,
            updated_at: observed.updated_at,
        };
        obj.status.resource.conditions.set(ready);
        lifecycle
    }

    fn late_initialize(&self, obj: &mut Device, observed: &ProviderDevice) -> LateInit {
        let p = &mut obj.spec.for_provider;
        let mut li = LateInit::new();

        li.string("hostname", &mut p.hostname, observed.hostname.as_deref());
        li.string("description", &mut p.description, observed.description.as_deref());
        li.string("billingCycle", &mut p.billing_cycle, observed.billing_cycle.as_deref());
        li.list("tags", &mut p.tags, &observed.tags);
        li.value("locked", &mut p.locked, Some(&observed.locked));
        li.string("ipxeScriptUrl", &mut p.ipxe_script_url, observed.ipxe_script_url.as_deref());
        li.value("alwaysPXE", &mut p.always_pxe, Some(&observed.always_pxe));
        li.string("customData", &mut p.custom_data, observed.customdata.as_deref());
        li.string("networkType", &mut p.network_type, observed.network_type.as_deref());
        li.string(
            "hardwareReservationID",
            &mut p.hardware_reservation_id,
            observed.hardware_reservation_id.as_deref(),
        );
        if p.userdata_ref.is_none() {
            li.string("userdata", &mut p.userdata, observed.userdata.as_deref());
        }
        li
    }

    fn diff(&self, obj: &Device, resolved: &ResolvedDevice, observed: &ProviderDevice) -> Drift {
        let p = &obj.spec.for_provider;
        let mut drift = Drift::new();

        drift.check_immutable("plan", Some(p.plan.as_str()), observed.plan.as_deref());
        drift.check_immutable(
            "operatingSystem",
            Some(p.operating_system.as_str()),
            observed.operating_system.as_deref(),
        );
        let facility = p.facility.as_deref().filter(|f| *f != FACILITY_ANY);
        drift.check_immutable("facility", facility, observed.facility.as_deref());
        drift.check_immutable("metro", p.metro.as_deref(), observed.metro.as_deref());
        drift.check_immutable("hostname", p.hostname.as_deref(), observed.hostname.as_deref());
        if let Some(reservation) = p.hardware_reservation_id.as_deref() {
            if observed.hardware_reservation_id.as_deref() != Some(reservation) {
                drift.immutable.push("hardwareReservationID");
            }
        }

        drift.check_mutable("description", p.description.as_deref(), observed.description.as_deref());
        drift.check_mutable(
            "billingCycle",
            p.billing_cycle.as_deref(),
            observed.billing_cycle.as_deref(),
        );
        drift.check_mutable("userdata", resolved.userdata.as_deref(), observed.userdata.as_deref());
        if let Some(tags) = &p.tags {
            if !same_set(tags, &observed.tags) {
                drift.mutable.push("tags");
            }
        }
        drift.check_mutable("locked", p.locked.as_ref(), Some(&observed.locked));
        drift.check_mutable(
            "ipxeScriptUrl",
            p.ipxe_script_url.as_deref(),
            observed.ipxe_script_url.as_deref(),
        );
        drift.check_mutable("alwaysPXE", p.always_pxe.as_ref(), Some(&observed.always_pxe));
        if let Some(custom) = p.custom_data.as_deref() {
            let matches = observed
                .customdata
                .as_deref()
                .is_some_and(|o| same_json(custom, o));
            if !matches {
                drift.mutable.push("customData");
            }
        }

        drift
    }

    fn unobserved_immutables(&self, obj: &Device) -> Vec<(&'static str, serde_json::Value)> {
        obj.spec.for_provider.unobserved_immutables()
    }
}
