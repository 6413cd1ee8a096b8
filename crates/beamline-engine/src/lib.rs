//! Workflow composition and execution.
//!
//! A plan is a static tree of [`PlanNode`]s. The [`WorkflowEngine`] validates
//! it and the run input, then hands it to the [`Interpreter`], which drives
//! the [`StepRunner`] leaf by leaf, recording outcomes into a run-scoped
//! [`ExecutionContext`] and tracked outcomes into an [`ExecutionLog`].

pub mod builtin;
pub mod context;
pub mod engine;
pub mod interpreter;
pub mod param;
pub mod path;
pub mod plan;
pub mod predicate;
pub mod registry;
pub mod run_log;
pub mod runner;
pub mod schema;
pub mod trace;

pub use context::{ExecutionContext, FinishedSteps, StepOutcome, INPUT_KEY};
pub use engine::{RunFailure, RunReport, WorkflowEngine};
pub use interpreter::Interpreter;
pub use param::RawParam;
pub use plan::{PlanNode, StepDefinition, StepOptions};
pub use predicate::{Expression, PredicateRef, PredicateRegistry};
pub use registry::StepRegistry;
pub use run_log::RunLogger;
pub use runner::{backoff_delay, RunScope, StepReport, StepRunner};
pub use schema::{AcceptAll, FieldSchema, JsonType};
pub use trace::{ExecutionLog, LogEntry};
