//! Mapping provider state onto the `Ready` condition and update gating.

use metal_api::{assignment_state, Condition, DeviceState};

/// Whether the provider has a workflow in flight for the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Safe to update or delete.
    Stable,
    /// Provider is mid-transition; leave it alone and look again shortly.
    Transitioning,
}

impl Lifecycle {
    pub fn is_stable(self) -> bool {
        self == Self::Stable
    }
}

/// `Ready` condition and lifecycle for a device state.
pub fn device_state(state: &DeviceState) -> (Condition, Lifecycle) {
    let ready = match state {
        DeviceState::Queued | DeviceState::Provisioning => Condition::creating(),
        DeviceState::Active => Condition::available(),
        DeviceState::Deprovisioning => Condition::deleting(),
        DeviceState::Unknown(raw) => {
            Condition::unavailable().with_message(format!("unrecognised device state {raw:?}"))
        }
        other => Condition::unavailable().with_message(format!("device is {other}")),
    };
    let lifecycle = if state.is_stable() {
        Lifecycle::Stable
    } else {
        Lifecycle::Transitioning
    };
    (ready, lifecycle)
}

/// `Ready` condition and lifecycle for an assignment state.
pub fn assignment_state(state: &str) -> (Condition, Lifecycle) {
    match state {
        assignment_state::ASSIGNED => (Condition::available(), Lifecycle::Stable),
        assignment_state::ASSIGNING => (Condition::creating(), Lifecycle::Transitioning),
        assignment_state::UNASSIGNING => (Condition::deleting(), Lifecycle::Transitioning),
        other => (
            Condition::unavailable().with_message(format!("unrecognised assignment state {other:?}")),
            Lifecycle::Stable,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metal_api::{reason, ConditionStatus};
    use rstest::rstest;

    #[rstest]
    #[case("queued", reason::CREATING, Lifecycle::Transitioning)]
    #[case("provisioning", reason::CREATING, Lifecycle::Transitioning)]
    #[case("active", reason::AVAILABLE, Lifecycle::Stable)]
    #[case("failed", reason::UNAVAILABLE, Lifecycle::Stable)]
    #[case("inactive", reason::UNAVAILABLE, Lifecycle::Stable)]
    #[case("powering_off", reason::UNAVAILABLE, Lifecycle::Transitioning)]
    #[case("reinstalling", reason::UNAVAILABLE, Lifecycle::Transitioning)]
    #[case("deprovisioning", reason::DELETING, Lifecycle::Transitioning)]
    #[case("rebooting", reason::UNAVAILABLE, Lifecycle::Transitioning)]
    fn test_device_state_mapping(
        #[case] raw: &str,
        #[case] expected_reason: &str,
        #[case] expected_lifecycle: Lifecycle,
    ) {
        let (ready, lifecycle) = device_state(&DeviceState::parse(raw));
        assert_eq!(ready.reason, expected_reason);
        assert_eq!(lifecycle, expected_lifecycle);
        assert_eq!(ready.status == ConditionStatus::True, raw == "active");
    }

    #[test]
    fn test_unknown_state_is_kept_in_message() {
        let (ready, _) = device_state(&DeviceState::parse("rebooting"));
        assert!(ready.message.unwrap().contains("rebooting"));
    }

    #[test]
    fn test_assignment_state_mapping() {
        assert_eq!(assignment_state("assigned").1, Lifecycle::Stable);
        assert_eq!(assignment_state("assigning").0.reason, reason::CREATING);
        assert_eq!(assignment_state("unassigning").1, Lifecycle::Transitioning);
    }
}
