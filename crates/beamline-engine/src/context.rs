use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use beamline_core::types::{OutcomeStatus, Params};

/// Reserved context key holding the caller-supplied input.
pub const INPUT_KEY: &str = "input";

/// Recorded outcome of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub status: OutcomeStatus,
    /// The unit's result on success, the last failure reason on error.
    pub value: Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub attempts: u32,
    /// Resolved input, kept only for steps with `store_io`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Params>,
}

impl StepOutcome {
    pub fn ok(value: Value, started_at: DateTime<Utc>, attempts: u32) -> Self {
        Self {
            status: OutcomeStatus::Ok,
            value,
            started_at,
            ended_at: Utc::now(),
            attempts,
            input: None,
        }
    }

    pub fn error(reason: impl Into<String>, started_at: DateTime<Utc>, attempts: u32) -> Self {
        Self {
            status: OutcomeStatus::Error,
            value: Value::String(reason.into()),
            started_at,
            ended_at: Utc::now(),
            attempts,
            input: None,
        }
    }

    pub fn with_input(mut self, input: Params) -> Self {
        self.input = Some(input);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Failure reason, if this outcome is an error.
    pub fn reason(&self) -> Option<&str> {
        match self.status {
            OutcomeStatus::Ok => None,
            OutcomeStatus::Error => Some(self.value.as_str().unwrap_or("step failed")),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        (self.ended_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Run-scoped map of step outcomes plus the original input.
///
/// Owned by exactly one run. Entries are only ever added: recording an id
/// twice keeps the first outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    input: Params,
    outcomes: BTreeMap<String, StepOutcome>,
}

impl ExecutionContext {
    /// Seed a context with the run input.
    pub fn new(input: Params) -> Self {
        Self {
            input,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn input(&self) -> &Params {
        &self.input
    }

    /// Get the outcome recorded for a step.
    pub fn outcome(&self, step_id: &str) -> Option<&StepOutcome> {
        self.outcomes.get(step_id)
    }

    /// Get the value a step produced.
    pub fn value(&self, step_id: &str) -> Option<&Value> {
        self.outcomes.get(step_id).map(|o| &o.value)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.outcomes.contains_key(step_id)
    }

    /// Number of recorded step outcomes (the input is not counted).
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.outcomes.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StepOutcome)> {
        self.outcomes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Record a step outcome. Returns false if the id was already present.
    pub fn record(&mut self, step_id: impl Into<String>, outcome: StepOutcome) -> bool {
        let step_id = step_id.into();
        if self.outcomes.contains_key(&step_id) {
            warn!(step_id = %step_id, "Ignoring second outcome for step");
            return false;
        }
        self.outcomes.insert(step_id, outcome);
        true
    }

    /// Merge entries a shadow copy produced that this context lacks.
    ///
    /// Returns the number of entries merged.
    pub fn absorb(&mut self, shadow: ExecutionContext) -> usize {
        self.fill_missing(shadow.outcomes)
    }

    /// Recover outcomes finished inside shadows that were never merged back,
    /// e.g. when the global deadline dropped a parallel block mid-flight.
    ///
    /// Returns the number of entries recovered.
    pub fn recover(&mut self, finished: &FinishedSteps) -> usize {
        self.fill_missing(finished.take())
    }

    fn fill_missing(&mut self, outcomes: impl IntoIterator<Item = (String, StepOutcome)>) -> usize {
        let mut merged = 0;
        for (step_id, outcome) in outcomes {
            if !self.outcomes.contains_key(&step_id) {
                self.outcomes.insert(step_id, outcome);
                merged += 1;
            }
        }
        merged
    }

    /// JSON view handed to predicates: `{"input": ..., "<step_id>": <outcome>}`.
    pub fn snapshot(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(INPUT_KEY.to_string(), Value::Object(self.input.clone()));
        for (step_id, outcome) in &self.outcomes {
            let entry = serde_json::to_value(outcome).unwrap_or(Value::Null);
            map.insert(step_id.clone(), entry);
        }
        Value::Object(map)
    }
}

/// Every leaf outcome of one run, in finishing order.
///
/// Clones share the same buffer, so outcomes written into a parallel shadow
/// survive the shadow being dropped.
#[derive(Debug, Clone, Default)]
pub struct FinishedSteps {
    entries: Arc<Mutex<Vec<(String, StepOutcome)>>>,
}

impl FinishedSteps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, step_id: &str, outcome: &StepOutcome) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((step_id.to_string(), outcome.clone()));
    }

    /// Drain everything pushed so far.
    pub fn take(&self) -> Vec<(String, StepOutcome)> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
