//! In-memory provider for tests and local runs.
//!
//! Behaves like the real API where the controller can tell the difference:
//! ids are server-assigned, creates are deduplicated on the idempotency key,
//! and state only moves when the test says so.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::{
    AssignmentApi, AssignmentCreate, DeleteOutcome, DeviceApi, DeviceCreate, DevicePatch,
    ProviderAssignment, ProviderDevice, ProviderError,
};

/// Provider operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateDevice,
    GetDevice,
    UpdateDevice,
    DeleteDevice,
    CreateAssignment,
    GetAssignment,
    DeleteAssignment,
}

#[derive(Default)]
struct FakeState {
    devices: BTreeMap<String, ProviderDevice>,
    assignments: BTreeMap<String, ProviderAssignment>,
    /// `(device id, port name)` to port id.
    ports: BTreeMap<(String, String), String>,
    idempotency: HashMap<String, String>,
    failures: HashMap<Operation, VecDeque<ProviderError>>,
    calls: HashMap<Operation, usize>,
    patches: Vec<(String, DevicePatch)>,
    preset_device_ids: VecDeque<String>,
    creates_in_flight: usize,
    max_creates_in_flight: usize,
    sequence: u64,
}

impl FakeState {
    fn begin(&mut self, op: Operation) -> Result<(), ProviderError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

pub struct FakeProvider {
    state: Mutex<FakeState>,
    latency: Duration,
    initial_state: String,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            latency: Duration::ZERO,
            initial_state: "queued".to_string(),
        }
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// State new devices start in.
    #[must_use]
    pub fn with_initial_state(mut self, state: impl Into<String>) -> Self {
        self.initial_state = state.into();
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Fail the next call of `op` with `err`. Failures queue up per operation.
    pub fn fail_next(&self, op: Operation, err: ProviderError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// Id to hand out for the next created device.
    pub fn queue_device_id(&self, id: impl Into<String>) {
        self.lock().preset_device_ids.push_back(id.into());
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Highest number of device creates observed in flight at once.
    pub fn max_concurrent_creates(&self) -> usize {
        self.lock().max_creates_in_flight
    }

    /// Patches received, in order.
    pub fn device_patches(&self) -> Vec<(String, DevicePatch)> {
        self.lock().patches.clone()
    }

    pub fn device(&self, id: &str) -> Option<ProviderDevice> {
        self.lock().devices.get(id).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.lock().devices.len()
    }

    pub fn assignment(&self, id: &str) -> Option<ProviderAssignment> {
        self.lock().assignments.get(id).cloned()
    }

    pub fn assignment_count(&self) -> usize {
        self.lock().assignments.len()
    }

    /// Edit a device in place, as an out-of-band change would.
    pub fn modify_device(&self, id: &str, f: impl FnOnce(&mut ProviderDevice)) {
        if let Some(device) = self.lock().devices.get_mut(id) {
            f(device);
        }
    }

    pub fn set_device_state(&self, id: &str, state: &str) {
        self.modify_device(id, |d| d.state = state.to_string());
    }

    /// Finish provisioning: `active` with a public address.
    pub fn activate(&self, id: &str, ipv4: &str) {
        self.modify_device(id, |d| {
            d.state = "active".to_string();
            d.provision_percentage = Some(100.0);
            d.ipv4 = Some(ipv4.to_string());
        });
    }

    pub fn remove_device(&self, id: &str) -> Option<ProviderDevice> {
        self.lock().devices.remove(id)
    }

    pub fn set_assignment_state(&self, id: &str, state: &str) {
        if let Some(a) = self.lock().assignments.get_mut(id) {
            a.state = state.to_string();
        }
    }
}

#[async_trait]
impl DeviceApi for FakeProvider {
    async fn create(
        &self,
        idempotency_key: &str,
        request: &DeviceCreate,
    ) -> Result<ProviderDevice, ProviderError> {
        {
            let mut state = self.lock();
            state.creates_in_flight += 1;
            state.max_creates_in_flight = state.max_creates_in_flight.max(state.creates_in_flight);
        }
        self.delay().await;

        let mut state = self.lock();
        state.creates_in_flight -= 1;
        state.begin(Operation::CreateDevice)?;

        if let Some(device) = state
            .idempotency
            .get(idempotency_key)
            .and_then(|id| state.devices.get(id))
        {
            return Ok(device.clone());
        }

        let seq = state.next_sequence();
        let id = state
            .preset_device_ids
            .pop_front()
            .unwrap_or_else(|| format!("dev-{seq}"));
        let facility = match (request.facility.as_deref(), request.metro.as_deref()) {
            (Some(metal_api::FACILITY_ANY), _) => Some("sv15".to_string()),
            (Some(facility), _) => Some(facility.to_string()),
            (None, Some(metro)) => Some(format!("{metro}11")),
            (None, None) => None,
        };
        let now = Utc::now();
        let device = ProviderDevice {
            id: id.clone(),
            href: Some(format!("/metal/v1/devices/{id}")),
            state: self.initial_state.clone(),
            provision_percentage: Some(0.0),
            plan: Some(request.plan.clone()),
            operating_system: Some(request.operating_system.clone()),
            facility,
            metro: request.metro.clone(),
            hostname: Some(
                request
                    .hostname
                    .clone()
                    .unwrap_or_else(|| format!("srv-{seq:03}")),
            ),
            description: request.description.clone(),
            billing_cycle: Some(
                request
                    .billing_cycle
                    .clone()
                    .unwrap_or_else(|| "hourly".to_string()),
            ),
            userdata: request.userdata.clone(),
            customdata: request.customdata.clone(),
            tags: request.tags.clone(),
            locked: request.locked.unwrap_or(false),
            ipxe_script_url: request.ipxe_script_url.clone(),
            always_pxe: request.always_pxe.unwrap_or(false),
            network_type: Some("layer3".to_string()),
            hardware_reservation_id: request.hardware_reservation_id.clone(),
            ipv4: None,
            created_at: Some(now),
            updated_at: Some(now),
        };

        state
            .idempotency
            .insert(idempotency_key.to_string(), id.clone());
        state.devices.insert(id, device.clone());
        Ok(device)
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderDevice>, ProviderError> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(Operation::GetDevice)?;
        Ok(state.devices.get(id).cloned())
    }

    async fn update(&self, id: &str, patch: &DevicePatch) -> Result<ProviderDevice, ProviderError> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(Operation::UpdateDevice)?;
        state.patches.push((id.to_string(), patch.clone()));

        let device = state
            .devices
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("device {id}")))?;
        if let Some(v) = &patch.description {
            device.description = Some(v.clone());
        }
        if let Some(v) = &patch.billing_cycle {
            device.billing_cycle = Some(v.clone());
        }
        if let Some(v) = &patch.userdata {
            device.userdata = Some(v.clone());
        }
        if let Some(v) = &patch.tags {
            device.tags = v.clone();
        }
        if let Some(v) = patch.locked {
            device.locked = v;
        }
        if let Some(v) = &patch.ipxe_script_url {
            device.ipxe_script_url = Some(v.clone());
        }
        if let Some(v) = patch.always_pxe {
            device.always_pxe = v;
        }
        if let Some(v) = &patch.customdata {
            device.customdata = Some(v.clone());
        }
        device.updated_at = Some(Utc::now());
        Ok(device.clone())
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, ProviderError> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(Operation::DeleteDevice)?;
        match state.devices.remove(id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }
}

#[async_trait]
impl AssignmentApi for FakeProvider {
    async fn create(
        &self,
        idempotency_key: &str,
        request: &AssignmentCreate,
    ) -> Result<ProviderAssignment, ProviderError> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(Operation::CreateAssignment)?;

        if let Some(existing) = state
            .idempotency
            .get(idempotency_key)
            .and_then(|id| state.assignments.get(id))
        {
            return Ok(existing.clone());
        }
        if !state.devices.contains_key(&request.device_id) {
            return Err(ProviderError::Rejected {
                status: 422,
                message: format!("device {} does not exist", request.device_id),
            });
        }

        let seq = state.next_sequence();
        let port_id = state
            .ports
            .entry((request.device_id.clone(), request.port_name.clone()))
            .or_insert_with(|| format!("port-{seq}"))
            .clone();
        let id = ProviderAssignment::external_id(&port_id, &request.virtual_network_id);
        let assignment = ProviderAssignment {
            id: id.clone(),
            port_id,
            device_id: Some(request.device_id.clone()),
            virtual_network_id: request.virtual_network_id.clone(),
            state: metal_api::assignment_state::ASSIGNED.to_string(),
        };

        state
            .idempotency
            .insert(idempotency_key.to_string(), id.clone());
        state.assignments.insert(id, assignment.clone());
        Ok(assignment)
    }

    async fn get(&self, id: &str) -> Result<Option<ProviderAssignment>, ProviderError> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(Operation::GetAssignment)?;
        Ok(state.assignments.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, ProviderError> {
        self.delay().await;
        let mut state = self.lock();
        state.begin(Operation::DeleteAssignment)?;
        match state.assignments.remove(id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::AlreadyAbsent),
        }
    }
}
