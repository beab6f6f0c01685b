//! Finite State Machine for deployment status
//!
//! ```text
//! pending -> running -> success | failed | cancelled
//!                    -> rolled_back   (rollback-triggered deployments only)
//! pending -> cancelled | failed
//! ```
//! Terminal states accept no events.

use crate::errors::EngineError;
use crate::models::deployment::{Deployment, DeploymentStatus, DeploymentTrigger, Outcome};

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Begin executing stages
    Start,

    /// All stages succeeded
    Succeed,

    /// A stage failed
    Fail(String),

    /// Operator cancelled the deployment
    Cancel,

    /// A rollback deployment restored its target
    RollBack,
}

impl From<Outcome> for DeploymentEvent {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => DeploymentEvent::Succeed,
            Outcome::Failed => DeploymentEvent::Fail(String::new()),
            Outcome::RolledBack => DeploymentEvent::RollBack,
        }
    }
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    trigger: DeploymentTrigger,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new(trigger: DeploymentTrigger) -> Self {
        Self {
            state: DeploymentStatus::Pending,
            trigger,
            error: None,
        }
    }

    /// Resume from a stored deployment
    pub fn from_deployment(deployment: &Deployment) -> Self {
        Self {
            state: deployment.status,
            trigger: deployment.trigger,
            error: deployment.error_message.clone(),
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, EngineError> {
        let new_state = match (self.state, &event) {
            // From Pending
            (DeploymentStatus::Pending, DeploymentEvent::Start) => DeploymentStatus::Running,
            (DeploymentStatus::Pending, DeploymentEvent::Cancel) => DeploymentStatus::Cancelled,
            (DeploymentStatus::Pending, DeploymentEvent::Fail(err)) => {
                self.record_error(err);
                DeploymentStatus::Failed
            }

            // From Running
            (DeploymentStatus::Running, DeploymentEvent::Succeed) => DeploymentStatus::Success,
            (DeploymentStatus::Running, DeploymentEvent::Fail(err)) => {
                self.record_error(err);
                DeploymentStatus::Failed
            }
            (DeploymentStatus::Running, DeploymentEvent::Cancel) => DeploymentStatus::Cancelled,
            (DeploymentStatus::Running, DeploymentEvent::RollBack)
                if self.trigger == DeploymentTrigger::Rollback =>
            {
                DeploymentStatus::RolledBack
            }

            // Invalid transitions
            (state, event) => {
                return Err(EngineError::InvalidTransition {
                    from: state.to_string(),
                    to: format!("{:?}", event),
                });
            }
        };

        self.state = new_state;
        Ok(new_state)
    }

    fn record_error(&mut self, err: &str) {
        if !err.is_empty() {
            self.error = Some(err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fsm_transitions() {
        let mut fsm = DeploymentFsm::new(DeploymentTrigger::Manual);
        assert_eq!(fsm.state(), DeploymentStatus::Pending);

        fsm.process(DeploymentEvent::Start).unwrap();
        assert_eq!(fsm.state(), DeploymentStatus::Running);

        fsm.process(DeploymentEvent::Succeed).unwrap();
        assert_eq!(fsm.state(), DeploymentStatus::Success);
    }

    #[test]
    fn test_fsm_error_handling() {
        let mut fsm = DeploymentFsm::new(DeploymentTrigger::Manual);

        fsm.process(DeploymentEvent::Start).unwrap();
        fsm.process(DeploymentEvent::Fail("test error".to_string()))
            .unwrap();

        assert_eq!(fsm.state(), DeploymentStatus::Failed);
        assert_eq!(fsm.error(), Some("test error"));
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let mut fsm = DeploymentFsm::new(DeploymentTrigger::Manual);
        fsm.process(DeploymentEvent::Cancel).unwrap();

        for event in [
            DeploymentEvent::Start,
            DeploymentEvent::Succeed,
            DeploymentEvent::Cancel,
            DeploymentEvent::Fail("late".to_string()),
        ] {
            assert!(fsm.process(event).is_err());
        }
        assert_eq!(fsm.state(), DeploymentStatus::Cancelled);
    }

    #[test]
    fn test_rolled_back_requires_rollback_trigger() {
        let mut manual = DeploymentFsm::new(DeploymentTrigger::Manual);
        manual.process(DeploymentEvent::Start).unwrap();
        assert!(manual.process(DeploymentEvent::RollBack).is_err());
        assert_eq!(manual.state(), DeploymentStatus::Running);

        let mut rollback = DeploymentFsm::new(DeploymentTrigger::Rollback);
        rollback.process(DeploymentEvent::Start).unwrap();
        assert_eq!(
            rollback.process(DeploymentEvent::RollBack).unwrap(),
            DeploymentStatus::RolledBack
        );
    }

    #[test]
    fn test_pending_cannot_succeed_directly() {
        let mut fsm = DeploymentFsm::new(DeploymentTrigger::Webhook);
        assert!(fsm.process(DeploymentEvent::Succeed).is_err());
    }
}
