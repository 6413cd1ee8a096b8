use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use beamline_core::error::Result;
use beamline_core::traits::InputSchema;
use beamline_core::types::{EngineEvent, ObjectiveId, Params, RunId};
use beamline_engine::{AcceptAll, PlanNode, RunFailure, RunReport, WorkflowEngine};

use crate::objective::ObjectiveStatusReport;
use crate::registry::ObjectiveRegistry;

/// Progress never reaches 100 before `complete`.
const MAX_RUNNING_PROGRESS: u32 = 99;

/// Result of driving an objective through one workflow run.
#[derive(Debug)]
pub struct ObjectiveRun {
    pub objective_id: ObjectiveId,
    /// Objective status after the run settled.
    pub status: ObjectiveStatusReport,
    pub outcome: std::result::Result<RunReport, RunFailure>,
}

/// Start an objective, run `plan` for it and settle the objective.
///
/// The run uses the objective's input schema and the engine's configured
/// global timeout. Finished steps are forwarded as progress when the engine
/// has an event bus. A successful run completes the objective; a failed run
/// fails it with the run error's message.
pub async fn run_objective(
    registry: &ObjectiveRegistry,
    objective_id: &ObjectiveId,
    engine: &WorkflowEngine,
    plan: &PlanNode,
    input: Params,
) -> Result<ObjectiveRun> {
    run_objective_as(registry, objective_id, RunId::new(), engine, plan, input).await
}

/// Like [`run_objective`], under a caller-chosen run id.
pub async fn run_objective_as(
    registry: &ObjectiveRegistry,
    objective_id: &ObjectiveId,
    run_id: RunId,
    engine: &WorkflowEngine,
    plan: &PlanNode,
    input: Params,
) -> Result<ObjectiveRun> {
    let objective = registry.get(objective_id).await?;
    let schema: Arc<dyn InputSchema> = objective
        .input_schema
        .clone()
        .unwrap_or_else(|| Arc::new(AcceptAll) as Arc<dyn InputSchema>);

    registry.start(objective_id).await?;

    info!(objective_id = %objective_id, run_id = %run_id, "Running workflow for objective");

    let forwarder = engine.event_bus().map(|bus| {
        spawn_progress_forwarder(
            bus.subscribe(),
            registry.clone(),
            objective_id.clone(),
            run_id.clone(),
            plan.leaf_count(),
        )
    });

    let outcome = engine
        .run_as(run_id, plan, input, schema.as_ref(), engine.config().global_timeout())
        .await;

    if let Some(handle) = forwarder {
        if let Err(e) = handle.await {
            warn!(objective_id = %objective_id, error = %e, "Progress forwarder panicked");
        }
    }

    let status = match &outcome {
        Ok(_) => registry.complete(objective_id).await?,
        Err(failure) => registry.fail(objective_id, failure.error.to_string()).await?,
    };

    Ok(ObjectiveRun {
        objective_id: objective_id.clone(),
        status,
        outcome,
    })
}

/// Translate `StepFinished` events of one run into progress updates.
///
/// `total_steps` starts as every leaf of the plan and shrinks by the leaves of
/// each branch arm not taken, so it only counts leaves the run can reach.
fn spawn_progress_forwarder(
    mut rx: broadcast::Receiver<EngineEvent>,
    registry: ObjectiveRegistry,
    objective_id: ObjectiveId,
    run_id: RunId,
    mut total_steps: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut finished: usize = 0;
        loop {
            match rx.recv().await {
                Ok(event) if event.run_id() == Some(&run_id) => match event {
                    EngineEvent::BranchTaken { skipped_steps, .. } => {
                        total_steps = total_steps.saturating_sub(skipped_steps);
                    }
                    EngineEvent::StepFinished { .. } if total_steps > 0 => {
                        finished += 1;
                        let progress = running_progress(finished, total_steps);
                        if let Err(e) = registry.update_progress(&objective_id, progress).await {
                            warn!(
                                objective_id = %objective_id,
                                error = %e,
                                "Progress update rejected"
                            );
                        }
                    }
                    EngineEvent::RunComplete { .. } | EngineEvent::RunError { .. } => break,
                    _ => {}
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Progress forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Percent of leaves finished, held below 100 until the objective completes.
fn running_progress(finished: usize, total: usize) -> u32 {
    let percent = (finished.saturating_mul(100) / total.max(1)) as u32;
    percent.min(MAX_RUNNING_PROGRESS)
}
