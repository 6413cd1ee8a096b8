use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Named parameters handed to a step unit, and the shape of a run's input.
pub type Params = serde_json::Map<String, serde_json::Value>;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn from_str(s: &str) -> Self {
                Self(s.to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of one workflow run.
    RunId
);
uuid_id!(
    /// Unique identifier of a tracked objective.
    ObjectiveId
);
uuid_id!(
    /// Unique identifier of a routed signal.
    SignalId
);

/// Whether a step produced a value or gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Ok,
    Error,
}

impl OutcomeStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Lifecycle state of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ObjectiveStatus {
    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ObjectiveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque call context handed to a step unit on every attempt.
///
/// Units that can stop early should watch `cancel`; it fires when the run's
/// global deadline passes. Stopping is best-effort.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: RunId,
    pub step_id: String,
    pub attempt: u32,
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(
        run_id: RunId,
        step_id: impl Into<String>,
        attempt: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            step_id: step_id.into(),
            attempt,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Engine event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Workflow run started.
    RunStarted { run_id: RunId },
    /// A step attempt is about to execute.
    StepStarted {
        run_id: RunId,
        step_id: String,
        attempt: u32,
    },
    /// A step attempt failed and will be retried after `delay_ms`.
    StepRetrying {
        run_id: RunId,
        step_id: String,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    /// A step finished (successfully or not) after `attempts` attempts.
    StepFinished {
        run_id: RunId,
        step_id: String,
        status: OutcomeStatus,
        attempts: u32,
        elapsed_ms: u64,
    },
    /// A branch predicate was evaluated.
    BranchTaken {
        run_id: RunId,
        predicate: String,
        taken: bool,
        /// Leaves of the arm not taken, none of which will run.
        skipped_steps: usize,
    },
    /// Workflow run completed successfully.
    RunComplete {
        run_id: RunId,
        steps: usize,
        elapsed_ms: u64,
    },
    /// Workflow run failed.
    RunError { run_id: RunId, error: String },
    /// An objective changed status or progress.
    ObjectiveTransition {
        objective_id: ObjectiveId,
        status: ObjectiveStatus,
        progress: u8,
    },
    /// A signal was handed to the router.
    SignalRouted {
        signal_id: SignalId,
        recipient: String,
        delivered: bool,
    },
}

impl EngineEvent {
    /// The run this event belongs to, if any.
    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            Self::RunStarted { run_id }
            | Self::StepStarted { run_id, .. }
            | Self::StepRetrying { run_id, .. }
            | Self::StepFinished { run_id, .. }
            | Self::BranchTaken { run_id, .. }
            | Self::RunComplete { run_id, .. }
            | Self::RunError { run_id, .. } => Some(run_id),
            Self::ObjectiveTransition { .. } | Self::SignalRouted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
        assert_eq!(ObjectiveId::from_str("obj-1").as_str(), "obj-1");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ObjectiveStatus::Pending.is_terminal());
        assert!(!ObjectiveStatus::InProgress.is_terminal());
        assert!(ObjectiveStatus::Completed.is_terminal());
        assert!(ObjectiveStatus::Failed.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ObjectiveStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let json = serde_json::to_string(&OutcomeStatus::Error).unwrap();
        assert_eq!(json, "\"error\"");
    }

    #[test]
    fn run_scoped_events_expose_run_id() {
        let run_id = RunId::from_str("run-7");
        let event = EngineEvent::StepStarted {
            run_id: run_id.clone(),
            step_id: "fetch".into(),
            attempt: 1,
        };
        assert_eq!(event.run_id(), Some(&run_id));

        let event = EngineEvent::SignalRouted {
            signal_id: SignalId::new(),
            recipient: "supervisor".into(),
            delivered: true,
        };
        assert!(event.run_id().is_none());
    }
}
