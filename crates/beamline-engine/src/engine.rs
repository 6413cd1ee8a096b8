use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use beamline_core::config::EngineConfig;
use beamline_core::error::BeamlineError;
use beamline_core::event::EventBus;
use beamline_core::traits::InputSchema;
use beamline_core::types::{EngineEvent, Params, RunId};

use crate::context::ExecutionContext;
use crate::interpreter::Interpreter;
use crate::plan::PlanNode;
use crate::predicate::PredicateRegistry;
use crate::registry::StepRegistry;
use crate::runner::{RunScope, StepRunner};
use crate::trace::{ExecutionLog, LogEntry};

/// Everything a successful run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub context: ExecutionContext,
    pub log: Vec<LogEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// A failed run: the first fatal error plus whatever was recorded before it.
#[derive(Debug, Error)]
#[error("run {run_id} failed")]
pub struct RunFailure {
    pub run_id: RunId,
    #[source]
    pub error: BeamlineError,
    /// Outcomes recorded before the failure, merged parallel siblings included.
    pub context: ExecutionContext,
    pub log: Vec<LogEntry>,
    pub elapsed_ms: u64,
}

/// Runs composed plans end to end.
///
/// Shareable across tasks: each run owns its own context and log, the
/// registries are read-only.
pub struct WorkflowEngine {
    units: Arc<StepRegistry>,
    predicates: Arc<PredicateRegistry>,
    event_bus: Option<Arc<EventBus>>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(units: Arc<StepRegistry>, predicates: Arc<PredicateRegistry>) -> Self {
        Self {
            units,
            predicates,
            event_bus: None,
            config: EngineConfig::default(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn units(&self) -> &StepRegistry {
        &self.units
    }

    pub fn predicates(&self) -> &PredicateRegistry {
        &self.predicates
    }

    pub fn event_bus(&self) -> Option<&Arc<EventBus>> {
        self.event_bus.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    fn interpreter(&self) -> Interpreter {
        let mut runner = StepRunner::new(self.units.clone());
        if let Some(bus) = &self.event_bus {
            runner = runner.with_event_bus(bus.clone());
        }
        let interpreter = Interpreter::new(runner, self.predicates.clone());
        match &self.event_bus {
            Some(bus) => interpreter.with_event_bus(bus.clone()),
            None => interpreter,
        }
    }

    /// Run `plan` with a fresh run id.
    ///
    /// `global_timeout` bounds the whole run; `Duration::ZERO` disables it.
    pub async fn run(
        &self,
        plan: &PlanNode,
        input: Params,
        schema: &dyn InputSchema,
        global_timeout: Duration,
    ) -> Result<RunReport, RunFailure> {
        self.run_as(RunId::new(), plan, input, schema, global_timeout)
            .await
    }

    /// Run with the global timeout from the engine config.
    pub async fn run_with_defaults(
        &self,
        plan: &PlanNode,
        input: Params,
        schema: &dyn InputSchema,
    ) -> Result<RunReport, RunFailure> {
        let timeout = self.config.global_timeout();
        self.run(plan, input, schema, timeout).await
    }

    /// Run under a caller-chosen id, so events can be correlated before the
    /// run starts.
    pub async fn run_as(
        &self,
        run_id: RunId,
        plan: &PlanNode,
        input: Params,
        schema: &dyn InputSchema,
        global_timeout: Duration,
    ) -> Result<RunReport, RunFailure> {
        let start = Instant::now();
        let started_at = Utc::now();
        let log = ExecutionLog::new();

        let validated = plan
            .validate(&self.units, &self.predicates)
            .and_then(|_| schema.validate(&input).map_err(BeamlineError::InvalidInput));
        let input = match validated {
            Ok(input) => input,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Run rejected before execution");
                let context = ExecutionContext::new(input);
                return Err(self.fail(run_id, e, context, &log, start));
            }
        };

        info!(run_id = %run_id, steps = plan.leaf_count(), "Workflow run started");
        self.publish(EngineEvent::RunStarted {
            run_id: run_id.clone(),
        });

        let mut context = ExecutionContext::new(input);
        let scope = RunScope::new(run_id.clone());
        let interpreter = self.interpreter();

        let result = {
            let execution = interpreter.execute(plan, &mut context, &log, &scope);
            if global_timeout.is_zero() {
                execution.await
            } else {
                match tokio::time::timeout(global_timeout, execution).await {
                    Ok(result) => result,
                    Err(_) => Err(BeamlineError::Timeout {
                        timeout_ms: global_timeout.as_millis() as u64,
                    }),
                }
            }
        };
        // Units still holding the token learn the run is over.
        scope.cancel.cancel();

        match result {
            Ok(()) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                info!(run_id = %run_id, steps = context.len(), elapsed_ms, "Workflow run complete");
                self.publish(EngineEvent::RunComplete {
                    run_id: run_id.clone(),
                    steps: context.len(),
                    elapsed_ms,
                });
                Ok(RunReport {
                    run_id,
                    context,
                    log: log.entries(),
                    started_at,
                    finished_at: Utc::now(),
                    elapsed_ms,
                })
            }
            Err(e) => {
                let recovered = context.recover(&scope.finished);
                if recovered > 0 {
                    debug!(
                        run_id = %run_id,
                        recovered,
                        "Recovered outcomes of abandoned parallel children"
                    );
                }
                Err(self.fail(run_id, e, context, &log, start))
            }
        }
    }

    fn fail(
        &self,
        run_id: RunId,
        error: BeamlineError,
        context: ExecutionContext,
        log: &ExecutionLog,
        start: Instant,
    ) -> RunFailure {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        error!(run_id = %run_id, error = %error, elapsed_ms, "Workflow run failed");
        self.publish(EngineEvent::RunError {
            run_id: run_id.clone(),
            error: error.to_string(),
        });
        RunFailure {
            run_id,
            error,
            context,
            log: log.entries(),
            elapsed_ms,
        }
    }
}
