use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Params, SignalId};

/// An immutable, schema-identified message routed between actors.
///
/// Signals are created by the objective state machine on every transition
/// and handed to a `SignalRouter` exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    /// Identifies the payload shape, e.g. `objective.status`.
    pub schema_id: String,
    pub payload: Params,
    pub sender: String,
    pub recipient: String,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        schema_id: impl Into<String>,
        payload: Params,
        sender: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            id: SignalId::new(),
            schema_id: schema_id.into(),
            payload,
            sender: sender.into(),
            recipient: recipient.into(),
            created_at: Utc::now(),
        }
    }

    /// Read a payload field.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.payload.get(key)
    }
}
