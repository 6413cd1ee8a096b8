use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{Result, StepFailure, ValidationIssue};
use crate::signal::Signal;
use crate::types::{Params, StepContext};

/// The smallest externally supplied piece of work.
///
/// The engine owns timeouts and retries; a unit only reports the outcome of
/// one attempt.
pub trait StepUnit: Send + Sync + 'static {
    /// Registry name (referenced by step definitions).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// Execute one attempt with resolved parameters.
    ///
    /// The returned future must not block the thread. Parallel siblings are
    /// polled on the same task, and timeouts only fire at await points, so
    /// blocking or CPU-heavy work belongs in `tokio::task::spawn_blocking`.
    fn execute(
        &self,
        input: Params,
        ctx: StepContext,
    ) -> BoxFuture<'_, std::result::Result<Value, StepFailure>>;
}

/// Input schema contract checked before a run touches any step.
pub trait InputSchema: Send + Sync + 'static {
    /// Return the (possibly normalized) input, or every issue found.
    fn validate(&self, input: &Params) -> std::result::Result<Params, Vec<ValidationIssue>>;
}

/// Branch predicate evaluated against a snapshot of the execution context.
pub trait Predicate: Send + Sync + 'static {
    fn evaluate(&self, context_snapshot: &Value) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    fn evaluate(&self, context_snapshot: &Value) -> bool {
        self(context_snapshot)
    }
}

/// Delivers signals to external role actors.
pub trait SignalRouter: Send + Sync + 'static {
    fn route(&self, signal: Signal) -> BoxFuture<'_, Result<()>>;
}
