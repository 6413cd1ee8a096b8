//! Objective lifecycle transitions.
//!
//! ```text
//! pending --start--> in_progress --complete--> completed
//!                    in_progress --fail-----> failed
//!                    in_progress --progress-> in_progress
//! ```
//!
//! `completed` and `failed` are terminal. Every rejected transition is an
//! error; nothing is coerced.

use chrono::Utc;

use beamline_core::error::{BeamlineError, Result};
use beamline_core::types::ObjectiveStatus;

use crate::objective::Objective;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Start,
    /// Set progress to a percentage. Values above 100 are rejected.
    Progress(u32),
    Complete,
    Fail(String),
}

impl Transition {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Progress(_) => "update progress",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
        }
    }
}

impl Objective {
    /// Apply a transition.
    ///
    /// Returns whether status or progress changed; callers signal only on change.
    pub fn apply(&mut self, transition: Transition) -> Result<bool> {
        match (self.status, transition) {
            (ObjectiveStatus::Pending, Transition::Start) => {
                self.status = ObjectiveStatus::InProgress;
                self.started_at = Some(Utc::now());
                Ok(true)
            }
            (ObjectiveStatus::InProgress, Transition::Progress(progress)) => {
                if progress > 100 {
                    return Err(BeamlineError::InvalidProgress(progress));
                }
                let progress = progress as u8;
                if progress == self.progress {
                    return Ok(false);
                }
                self.progress = progress;
                Ok(true)
            }
            (ObjectiveStatus::InProgress, Transition::Complete) => {
                self.status = ObjectiveStatus::Completed;
                self.progress = 100;
                self.completed_at = Some(Utc::now());
                Ok(true)
            }
            (ObjectiveStatus::InProgress, Transition::Fail(reason)) => {
                self.status = ObjectiveStatus::Failed;
                self.error = Some(reason);
                self.completed_at = Some(Utc::now());
                Ok(true)
            }
            (from, transition) => Err(self.rejected(from, transition.action())),
        }
    }

    /// Record the agent working on this objective. Not a lifecycle change.
    pub fn assign(&mut self, agent_id: impl Into<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.rejected(self.status, "assign"));
        }
        self.assigned_agent = Some(agent_id.into());
        Ok(())
    }

    fn rejected(&self, from: ObjectiveStatus, action: &str) -> BeamlineError {
        BeamlineError::InvalidTransition {
            objective_id: self.id.to_string(),
            from: from.to_string(),
            action: action.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::NewObjective;

    fn objective() -> Objective {
        Objective::new(NewObjective::new("test"))
    }

    #[test]
    fn test_happy_path() {
        let mut obj = objective();
        assert!(obj.apply(Transition::Start).unwrap());
        assert!(obj.started_at.is_some());
        assert!(obj.apply(Transition::Progress(40)).unwrap());
        assert_eq!(obj.status, ObjectiveStatus::InProgress);
        assert!(obj.apply(Transition::Complete).unwrap());
        assert_eq!(obj.status, ObjectiveStatus::Completed);
        assert_eq!(obj.progress, 100);
        assert!(obj.completed_at.is_some());
    }

    #[test]
    fn test_fail_keeps_progress_and_reason() {
        let mut obj = objective();
        obj.apply(Transition::Start).unwrap();
        obj.apply(Transition::Progress(40)).unwrap();
        obj.apply(Transition::Fail("network down".into())).unwrap();

        let report = obj.status_report();
        assert_eq!(report.status, ObjectiveStatus::Failed);
        assert_eq!(report.progress, 40);
        assert_eq!(report.error.as_deref(), Some("network down"));
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let mut obj = objective();
        obj.apply(Transition::Start).unwrap();
        obj.apply(Transition::Complete).unwrap();

        for t in [
            Transition::Start,
            Transition::Progress(10),
            Transition::Complete,
            Transition::Fail("late".into()),
        ] {
            let err = obj.apply(t).unwrap_err();
            assert!(matches!(err, BeamlineError::InvalidTransition { .. }));
        }
        assert_eq!(obj.progress, 100);
        assert!(obj.assign("agent-1").is_err());
    }

    #[test]
    fn test_pending_rejects_complete() {
        let mut obj = objective();
        let err = obj.apply(Transition::Complete).unwrap_err();
        assert!(err.to_string().contains("cannot complete while pending"));
        assert_eq!(obj.status, ObjectiveStatus::Pending);
    }

    #[test]
    fn test_progress_bounds_and_noop() {
        let mut obj = objective();
        obj.apply(Transition::Start).unwrap();
        assert!(matches!(
            obj.apply(Transition::Progress(101)),
            Err(BeamlineError::InvalidProgress(101))
        ));
        assert!(!obj.apply(Transition::Progress(0)).unwrap());
        assert!(obj.apply(Transition::Progress(100)).unwrap());
        assert_eq!(obj.status, ObjectiveStatus::InProgress);
    }

    #[test]
    fn test_assign_before_start() {
        let mut obj = objective();
        obj.assign("agent-7").unwrap();
        assert_eq!(obj.assigned_agent.as_deref(), Some("agent-7"));
    }
}
