use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use beamline_core::error::BeamlineError;
use beamline_core::event::EventBus;
use beamline_core::traits::StepUnit;
use beamline_core::types::{EngineEvent, Params, RunId, StepContext};

use crate::context::{ExecutionContext, FinishedSteps, StepOutcome};
use crate::param;
use crate::plan::StepDefinition;
use crate::registry::StepRegistry;

/// Per-run data every step attempt needs.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub run_id: RunId,
    /// Fired when the run is abandoned; handed to units for cooperative stops.
    pub cancel: CancellationToken,
    /// Every leaf outcome of the run, parallel shadows included.
    pub finished: FinishedSteps,
}

impl RunScope {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            cancel: CancellationToken::new(),
            finished: FinishedSteps::new(),
        }
    }
}

/// What running one step produced.
#[derive(Debug)]
pub struct StepReport {
    pub outcome: StepOutcome,
    /// Set when the outcome is an error.
    pub error: Option<BeamlineError>,
}

impl StepReport {
    fn failed(outcome: StepOutcome, error: BeamlineError) -> Self {
        Self {
            outcome,
            error: Some(error),
        }
    }
}

/// Delay before attempt `attempt + 1`: linear in the attempt number.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(u64::from(attempt)))
}

/// Executes one step with its timeout and retry policy.
pub struct StepRunner {
    units: Arc<StepRegistry>,
    event_bus: Option<Arc<EventBus>>,
}

impl StepRunner {
    pub fn new(units: Arc<StepRegistry>) -> Self {
        Self {
            units,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    /// Run a step against the context it is allowed to see.
    ///
    /// Resolution failures and missing units are plan defects and are never
    /// retried. Unit failures and timeouts are retried up to the step's
    /// attempt budget with linear backoff.
    pub async fn run(
        &self,
        step: &StepDefinition,
        context: &ExecutionContext,
        scope: &RunScope,
    ) -> StepReport {
        let started_at = Utc::now();

        let input = match param::resolve(&step.params, context) {
            Ok(input) => input,
            Err(e) => {
                error!(step_id = %step.id, error = %e, "Step parameters did not resolve");
                let outcome = StepOutcome::error(e.to_string(), started_at, 0);
                self.publish_finished(scope, step, &outcome);
                return StepReport::failed(outcome, e.into());
            }
        };

        let Some(unit) = self.units.get(&step.unit) else {
            error!(step_id = %step.id, unit = %step.unit, "Step unit not registered");
            let reason = format!("step unit '{}' not registered", step.unit);
            let outcome = StepOutcome::error(reason, started_at, 0);
            self.publish_finished(scope, step, &outcome);
            return StepReport::failed(outcome, BeamlineError::UnitNotFound(step.unit.clone()));
        };

        let (outcome, error) = self
            .attempt_loop(step, unit.as_ref(), &input, scope, started_at)
            .await;
        let outcome = if step.options.store_io {
            outcome.with_input(input)
        } else {
            outcome
        };

        self.publish_finished(scope, step, &outcome);
        StepReport { outcome, error }
    }

    async fn attempt_loop(
        &self,
        step: &StepDefinition,
        unit: &dyn StepUnit,
        input: &Params,
        scope: &RunScope,
        started_at: DateTime<Utc>,
    ) -> (StepOutcome, Option<BeamlineError>) {
        let budget = step.options.attempt_budget();
        let mut attempt: u32 = 1;

        loop {
            debug!(step_id = %step.id, attempt, budget, "Executing step attempt");
            self.publish(EngineEvent::StepStarted {
                run_id: scope.run_id.clone(),
                step_id: step.id.clone(),
                attempt,
            });

            let ctx = StepContext::new(
                scope.run_id.clone(),
                step.id.as_str(),
                attempt,
                scope.cancel.clone(),
            );
            let result = tokio::select! {
                result = execute_once(unit, input.clone(), ctx, step.options.timeout_ms) => result,
                _ = scope.cancel.cancelled() => {
                    return cancelled(step, started_at, attempt);
                }
            };

            match result {
                Ok(value) => {
                    info!(step_id = %step.id, attempts = attempt, "Step succeeded");
                    return (StepOutcome::ok(value, started_at, attempt), None);
                }
                Err(reason) if attempt < budget => {
                    let delay = backoff_delay(step.options.retry_backoff_ms, attempt);
                    warn!(
                        step_id = %step.id,
                        attempt,
                        budget,
                        backoff_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Retrying step"
                    );
                    self.publish(EngineEvent::StepRetrying {
                        run_id: scope.run_id.clone(),
                        step_id: step.id.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        reason,
                    });
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = scope.cancel.cancelled() => {
                            return cancelled(step, started_at, attempt);
                        }
                    }
                    attempt += 1;
                }
                Err(reason) => {
                    error!(step_id = %step.id, attempts = attempt, error = %reason, "Step failed");
                    let outcome = StepOutcome::error(reason.clone(), started_at, attempt);
                    let error = BeamlineError::StepFailed {
                        step_id: step.id.clone(),
                        attempts: attempt,
                        reason,
                    };
                    return (outcome, Some(error));
                }
            }
        }
    }

    fn publish_finished(&self, scope: &RunScope, step: &StepDefinition, outcome: &StepOutcome) {
        self.publish(EngineEvent::StepFinished {
            run_id: scope.run_id.clone(),
            step_id: step.id.clone(),
            status: outcome.status,
            attempts: outcome.attempts,
            elapsed_ms: outcome.elapsed_ms(),
        });
    }
}

fn cancelled(
    step: &StepDefinition,
    started_at: DateTime<Utc>,
    attempts: u32,
) -> (StepOutcome, Option<BeamlineError>) {
    warn!(step_id = %step.id, attempts, "Step cancelled");
    (
        StepOutcome::error("cancelled", started_at, attempts),
        Some(BeamlineError::Cancelled),
    )
}

/// One attempt, bounded by `timeout_ms` (0 = unbounded). A timeout is
/// reported like any other unit failure.
async fn execute_once(
    unit: &dyn StepUnit,
    input: Params,
    ctx: StepContext,
    timeout_ms: u64,
) -> Result<Value, String> {
    let execution = unit.execute(input, ctx);
    if timeout_ms == 0 {
        return execution.await.map_err(|e| e.reason);
    }

    match tokio::time::timeout(Duration::from_millis(timeout_ms), execution).await {
        Ok(result) => result.map_err(|e| e.reason),
        Err(_) => Err(format!("timed out after {}ms", timeout_ms)),
    }
}
