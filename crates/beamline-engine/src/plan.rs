use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use beamline_core::config::EngineConfig;
use beamline_core::error::{BeamlineError, Result};

use crate::context::INPUT_KEY;
use crate::param::RawParam;
use crate::predicate::{PredicateRef, PredicateRegistry};
use crate::registry::StepRegistry;

/// Execution policy of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOptions {
    /// Per-attempt timeout in milliseconds (0 = unbounded).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts including the first (0 is treated as 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff base: the delay before attempt n+1 is `retry_backoff_ms * n`.
    #[serde(default)]
    pub retry_backoff_ms: u64,
    /// Append the outcome to the execution log.
    #[serde(default = "default_track")]
    pub track: bool,
    /// Keep the resolved input on the recorded outcome.
    #[serde(default)]
    pub store_io: bool,
}

fn default_timeout_ms() -> u64 { 30_000 }
fn default_max_attempts() -> u32 { 1 }
fn default_track() -> bool { true }

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: 0,
            track: default_track(),
            store_io: false,
        }
    }
}

impl StepOptions {
    /// Step defaults taken from the engine section of the config.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout_ms: config.step_timeout_ms,
            max_attempts: config.max_attempts.max(1),
            retry_backoff_ms: config.retry_backoff_ms,
            ..Self::default()
        }
    }

    /// Attempt budget, never less than one.
    pub fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A named invocation of a step unit.
///
/// Constructed once when the plan is built and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within the whole plan.
    pub id: String,
    /// Name of the step unit in the `StepRegistry`.
    pub unit: String,
    #[serde(default)]
    pub params: BTreeMap<String, RawParam>,
    #[serde(default)]
    pub options: StepOptions,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            unit: unit.into(),
            params: BTreeMap::new(),
            options: StepOptions::default(),
        }
    }

    /// Declare a parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<RawParam>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replace all options.
    pub fn with_options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.options.timeout_ms = timeout_ms;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.options.max_attempts = max_attempts;
        self
    }

    pub fn retry_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.options.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn track(mut self, track: bool) -> Self {
        self.options.track = track;
        self
    }

    pub fn store_io(mut self, store_io: bool) -> Self {
        self.options.store_io = store_io;
        self
    }
}

/// A composed plan: a static tree of sequence, parallel, branch and leaf nodes.
///
/// Built once per workflow and shared read-only by every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanNode {
    /// Children run strictly in order.
    Sequence(Vec<PlanNode>),
    /// Children run concurrently against shadow copies of the context.
    Parallel(Vec<PlanNode>),
    /// Exactly one arm runs, chosen by the predicate.
    Branch {
        predicate: PredicateRef,
        on_true: Box<PlanNode>,
        on_false: Box<PlanNode>,
    },
    /// A single step.
    Leaf(StepDefinition),
}

impl PlanNode {
    pub fn sequence(children: Vec<PlanNode>) -> Self {
        Self::Sequence(children)
    }

    pub fn parallel(children: Vec<PlanNode>) -> Self {
        Self::Parallel(children)
    }

    pub fn branch(predicate: PredicateRef, on_true: PlanNode, on_false: PlanNode) -> Self {
        Self::Branch {
            predicate,
            on_true: Box::new(on_true),
            on_false: Box::new(on_false),
        }
    }

    pub fn leaf(step: StepDefinition) -> Self {
        Self::Leaf(step)
    }

    /// Parse a plan from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Every step definition in document order (both branch arms included).
    pub fn steps(&self) -> Vec<&StepDefinition> {
        let mut out = Vec::new();
        self.collect_steps(&mut out);
        out
    }

    fn collect_steps<'a>(&'a self, out: &mut Vec<&'a StepDefinition>) {
        match self {
            Self::Sequence(children) | Self::Parallel(children) => {
                for child in children {
                    child.collect_steps(out);
                }
            }
            Self::Branch {
                on_true, on_false, ..
            } => {
                on_true.collect_steps(out);
                on_false.collect_steps(out);
            }
            Self::Leaf(step) => out.push(step),
        }
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        self.steps().len()
    }

    /// Check the plan against the registries before anything runs.
    ///
    /// Rejects duplicate, empty or reserved step ids, unregistered step units,
    /// unregistered named predicates and malformed expressions.
    pub fn validate(&self, units: &StepRegistry, predicates: &PredicateRegistry) -> Result<()> {
        let mut seen = HashSet::new();
        for step in self.steps() {
            if step.id.trim().is_empty() {
                return Err(BeamlineError::InvalidPlan("step id must not be empty".into()));
            }
            if step.id == INPUT_KEY {
                return Err(BeamlineError::InvalidPlan(format!(
                    "step id '{}' is reserved for the run input",
                    INPUT_KEY
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(BeamlineError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            if units.get(&step.unit).is_none() {
                return Err(BeamlineError::UnitNotFound(step.unit.clone()));
            }
        }
        self.check_predicates(predicates)
    }

    fn check_predicates(&self, predicates: &PredicateRegistry) -> Result<()> {
        match self {
            Self::Sequence(children) | Self::Parallel(children) => children
                .iter()
                .try_for_each(|child| child.check_predicates(predicates)),
            Self::Branch {
                predicate,
                on_true,
                on_false,
            } => {
                predicates.check(predicate)?;
                on_true.check_predicates(predicates)?;
                on_false.check_predicates(predicates)
            }
            Self::Leaf(_) => Ok(()),
        }
    }
}

impl From<StepDefinition> for PlanNode {
    fn from(step: StepDefinition) -> Self {
        Self::Leaf(step)
    }
}
