//! Finite State Machine for deployment status

use shipyard_domain::{DeploymentStatus, EventType};

/// What applying an event does to a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Record the event's fields and move to the given status
    Apply(DeploymentStatus),

    /// Nothing to do; the event is consumed
    NoOp,

    /// The event arrived early; leave it for redelivery
    Deferred,
}

/// Deployment FSM
///
/// `queued -> building -> deployed`, with `failed` reachable from any non-terminal
/// state. `deployed` and `failed` absorb every later event.
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
}

impl DeploymentFsm {
    pub fn new(state: DeploymentStatus) -> Self {
        Self { state }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: &EventType) -> Step {
        let step = match (&self.state, event) {
            // Terminal states absorb everything, including duplicates
            (state, _) if state.is_terminal() => Step::NoOp,

            // Failures
            (_, event) if event.is_failure() => Step::Apply(DeploymentStatus::Failed),

            // Build progress
            (
                DeploymentStatus::Queued | DeploymentStatus::Building,
                EventType::BackendBuilding
                | EventType::BackendBuildSuccess
                | EventType::FrontendBuildQueued,
            ) => Step::Apply(DeploymentStatus::Building),

            // Metadata
            (DeploymentStatus::Queued, EventType::DeploymentMetadataReceived) => Step::Deferred,
            (DeploymentStatus::Building, EventType::DeploymentMetadataReceived) => {
                Step::Apply(DeploymentStatus::Deployed)
            }

            // Creation is recorded synchronously by the trigger
            (_, EventType::Created) => Step::NoOp,

            (_, _) => Step::NoOp,
        };

        if let Step::Apply(next) = step {
            self.state = next;
        }
        step
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new(DeploymentStatus::Queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsm_transitions() {
        let mut fsm = DeploymentFsm::default();
        assert_eq!(fsm.state(), DeploymentStatus::Queued);

        assert_eq!(fsm.process(&EventType::Created), Step::NoOp);
        assert_eq!(
            fsm.process(&EventType::BackendBuilding),
            Step::Apply(DeploymentStatus::Building)
        );
        assert_eq!(
            fsm.process(&EventType::BackendBuildSuccess),
            Step::Apply(DeploymentStatus::Building)
        );
        assert_eq!(
            fsm.process(&EventType::DeploymentMetadataReceived),
            Step::Apply(DeploymentStatus::Deployed)
        );
        assert_eq!(fsm.state(), DeploymentStatus::Deployed);
    }

    #[test]
    fn test_fsm_error_handling() {
        let mut fsm = DeploymentFsm::default();
        assert_eq!(
            fsm.process(&EventType::FrontendBuildFailed),
            Step::Apply(DeploymentStatus::Failed)
        );
        assert_eq!(fsm.state(), DeploymentStatus::Failed);
    }

    #[test]
    fn test_terminal_states_absorb_everything() {
        let events = [
            EventType::Created,
            EventType::BackendBuilding,
            EventType::BackendBuildSuccess,
            EventType::BackendBuildFailed,
            EventType::FrontendBuildQueued,
            EventType::FrontendBuildFailed,
            EventType::DeploymentMetadataReceived,
            EventType::InternalError,
            EventType::Unknown("SOMETHING_NEW".to_string()),
        ];

        for terminal in [DeploymentStatus::Deployed, DeploymentStatus::Failed] {
            for event in &events {
                let mut fsm = DeploymentFsm::new(terminal);
                assert_eq!(fsm.process(event), Step::NoOp, "{} on {}", event, terminal);
                assert_eq!(fsm.state(), terminal);
            }
        }
    }

    #[test]
    fn test_early_metadata_is_deferred() {
        let mut fsm = DeploymentFsm::default();
        assert_eq!(
            fsm.process(&EventType::DeploymentMetadataReceived),
            Step::Deferred
        );
        assert_eq!(fsm.state(), DeploymentStatus::Queued);
    }

    #[test]
    fn test_unknown_events_are_ignored() {
        let mut fsm = DeploymentFsm::new(DeploymentStatus::Building);
        assert_eq!(
            fsm.process(&EventType::Unknown("BACKEND_SCALED".to_string())),
            Step::NoOp
        );
        assert_eq!(fsm.state(), DeploymentStatus::Building);
    }
}
