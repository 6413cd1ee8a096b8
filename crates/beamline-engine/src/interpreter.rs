use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tracing::{debug, info};

use beamline_core::error::Result;
use beamline_core::event::EventBus;
use beamline_core::types::EngineEvent;

use crate::context::ExecutionContext;
use crate::plan::{PlanNode, StepDefinition};
use crate::predicate::{PredicateRef, PredicateRegistry};
use crate::runner::{RunScope, StepRunner};
use crate::trace::ExecutionLog;

/// Walks a plan tree and drives the step runner.
///
/// A failing leaf halts the enclosing sequence or branch arm and propagates
/// to the top. Parallel children always run to completion before the first
/// failure (in child order) is surfaced.
pub struct Interpreter {
    runner: StepRunner,
    predicates: Arc<PredicateRegistry>,
    event_bus: Option<Arc<EventBus>>,
}

impl Interpreter {
    pub fn new(runner: StepRunner, predicates: Arc<PredicateRegistry>) -> Self {
        Self {
            runner,
            predicates,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Execute `node`, recording outcomes into `context` and tracked
    /// outcomes into `log`.
    pub fn execute<'a>(
        &'a self,
        node: &'a PlanNode,
        context: &'a mut ExecutionContext,
        log: &'a ExecutionLog,
        scope: &'a RunScope,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match node {
                PlanNode::Leaf(step) => self.execute_leaf(step, context, log, scope).await,
                PlanNode::Sequence(children) => {
                    for child in children {
                        self.execute(child, context, log, scope).await?;
                    }
                    Ok(())
                }
                PlanNode::Parallel(children) => {
                    self.execute_parallel(children, context, log, scope).await
                }
                PlanNode::Branch {
                    predicate,
                    on_true,
                    on_false,
                } => {
                    let arm = self.decide(predicate, on_true, on_false, context, scope)?;
                    self.execute(arm, context, log, scope).await
                }
            }
        })
    }

    async fn execute_leaf(
        &self,
        step: &StepDefinition,
        context: &mut ExecutionContext,
        log: &ExecutionLog,
        scope: &RunScope,
    ) -> Result<()> {
        let report = self.runner.run(step, context, scope).await;
        if step.options.track {
            log.append(&step.id, &step.unit, report.outcome.clone());
        }
        scope.finished.push(&step.id, &report.outcome);
        context.record(step.id.as_str(), report.outcome);

        match report.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn execute_parallel(
        &self,
        children: &[PlanNode],
        context: &mut ExecutionContext,
        log: &ExecutionLog,
        scope: &RunScope,
    ) -> Result<()> {
        debug!(run_id = %scope.run_id, children = children.len(), "Entering parallel block");

        // Every child gets its own copy of the context as of entry.
        let mut shadows: Vec<ExecutionContext> = children.iter().map(|_| context.clone()).collect();
        let results = join_all(
            children
                .iter()
                .zip(shadows.iter_mut())
                .map(|(child, shadow)| self.execute(child, shadow, log, scope)),
        )
        .await;

        let mut merged = 0;
        for shadow in shadows {
            merged += context.absorb(shadow);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(run_id = %scope.run_id, merged, failed, "Parallel block joined");

        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }

    /// Evaluate the predicate once and pick the arm to run.
    fn decide<'n>(
        &self,
        predicate: &PredicateRef,
        on_true: &'n PlanNode,
        on_false: &'n PlanNode,
        context: &ExecutionContext,
        scope: &RunScope,
    ) -> Result<&'n PlanNode> {
        let snapshot = context.snapshot();
        let taken = self.predicates.evaluate(predicate, &snapshot)?;
        let (arm, skipped) = if taken {
            (on_true, on_false)
        } else {
            (on_false, on_true)
        };
        let skipped_steps = skipped.leaf_count();
        info!(
            run_id = %scope.run_id,
            predicate = predicate.label(),
            taken,
            skipped_steps,
            "Branch decided"
        );

        if let Some(bus) = &self.event_bus {
            bus.publish(EngineEvent::BranchTaken {
                run_id: scope.run_id.clone(),
                predicate: predicate.label().to_string(),
                taken,
                skipped_steps,
            });
        }
        Ok(arm)
    }
}
