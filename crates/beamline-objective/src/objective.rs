use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use beamline_core::traits::InputSchema;
use beamline_core::types::{ObjectiveId, ObjectiveStatus};

/// A tracked goal with a lifecycle, independent of any particular run.
#[derive(Clone, Serialize)]
pub struct Objective {
    pub id: ObjectiveId,
    pub name: String,
    pub description: String,
    /// Schema runs for this objective validate their input against.
    #[serde(skip)]
    pub input_schema: Option<Arc<dyn InputSchema>>,
    pub status: ObjectiveStatus,
    /// Percent complete, 0..=100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason, set only when failed.
    pub error: Option<String>,
    pub assigned_agent: Option<String>,
}

impl Objective {
    /// A fresh objective in `pending`.
    pub fn new(new: NewObjective) -> Self {
        Self {
            id: ObjectiveId::new(),
            name: new.name,
            description: new.description,
            input_schema: new.input_schema,
            status: ObjectiveStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            assigned_agent: None,
        }
    }

    pub fn status_report(&self) -> ObjectiveStatusReport {
        ObjectiveStatusReport {
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
        }
    }
}

impl std::fmt::Debug for Objective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Objective")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("progress", &self.progress)
            .field("error", &self.error)
            .field("assigned_agent", &self.assigned_agent)
            .field("has_input_schema", &self.input_schema.is_some())
            .finish()
    }
}

/// Parameters for creating an objective.
#[derive(Clone, Default)]
pub struct NewObjective {
    pub name: String,
    pub description: String,
    pub input_schema: Option<Arc<dyn InputSchema>>,
}

impl NewObjective {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input_schema(mut self, schema: impl InputSchema) -> Self {
        self.input_schema = Some(Arc::new(schema));
        self
    }
}

/// Answer to `get_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectiveStatusReport {
    pub status: ObjectiveStatus,
    pub progress: u8,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamline_engine::AcceptAll;

    #[test]
    fn test_new_objective_is_pending() {
        let objective = Objective::new(
            NewObjective::new("sync accounts")
                .description("nightly sync")
                .input_schema(AcceptAll),
        );
        assert_eq!(objective.status, ObjectiveStatus::Pending);
        assert_eq!(objective.progress, 0);
        assert!(objective.started_at.is_none());
        assert!(objective.input_schema.is_some());
        assert_eq!(
            objective.status_report(),
            ObjectiveStatusReport {
                status: ObjectiveStatus::Pending,
                progress: 0,
                error: None
            }
        );
    }

    #[test]
    fn test_serialize_skips_schema() {
        let objective = Objective::new(NewObjective::new("x").input_schema(AcceptAll));
        let json = serde_json::to_value(&objective).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("input_schema").is_none());
    }
}
