use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single problem reported by an input schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Input field the issue refers to.
    pub field: String,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Failure reported by a step unit for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct StepFailure {
    pub reason: String,
}

impl StepFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<String> for StepFailure {
    fn from(reason: String) -> Self {
        Self { reason }
    }
}

impl From<&str> for StepFailure {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

/// A parameter reference that could not be satisfied by the execution context.
///
/// Both variants are plan defects: a step may only reference steps the plan
/// guarantees have already run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("unresolved reference: no outcome recorded for step '{step_id}'")]
    UnresolvedStep { step_id: String },

    #[error("unresolved reference: path '{path}' not found in {target}")]
    UnresolvedPath { target: String, path: String },
}

#[derive(Debug, Error)]
pub enum BeamlineError {
    // Plan and step errors
    #[error("Parameter resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Step '{step_id}' failed after {attempts} attempt(s): {reason}")]
    StepFailed {
        step_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Step unit not registered: {0}")]
    UnitNotFound(String),

    #[error("Predicate not registered: {0}")]
    PredicateNotFound(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    // Run errors
    #[error("Invalid input: {}", summarize_issues(.0))]
    InvalidInput(Vec<ValidationIssue>),

    #[error("Workflow exceeded global timeout of {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Run cancelled")]
    Cancelled,

    // Objective errors
    #[error("Objective not found: {0}")]
    ObjectiveNotFound(String),

    #[error("Invalid transition for objective {objective_id}: cannot {action} while {from}")]
    InvalidTransition {
        objective_id: String,
        from: String,
        action: String,
    },

    #[error("Invalid progress value {0} (expected 0..=100)")]
    InvalidProgress(u32),

    #[error("Signal routing failed: {0}")]
    Routing(String),

    #[error("Objective registry is no longer running")]
    RegistryClosed,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn summarize_issues(issues: &[ValidationIssue]) -> String {
    if issues.is_empty() {
        return "rejected by schema".to_string();
    }
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, BeamlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_lists_every_issue() {
        let err = BeamlineError::InvalidInput(vec![
            ValidationIssue::new("amount", "is required"),
            ValidationIssue::new("currency", "expected string"),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid input: amount: is required; currency: expected string"
        );
    }

    #[test]
    fn resolution_error_converts() {
        let err: BeamlineError = ResolutionError::UnresolvedStep {
            step_id: "fetch".into(),
        }
        .into();
        assert!(matches!(err, BeamlineError::Resolution(_)));
        assert!(err.to_string().contains("'fetch'"));
    }

    #[test]
    fn step_failure_from_str() {
        let failure: StepFailure = "network down".into();
        assert_eq!(failure.to_string(), "network down");
    }
}
