use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use beamline_core::config::ObjectiveConfig;
use beamline_core::error::BeamlineError;
use beamline_core::event::EventBus;
use beamline_core::signal::Signal;
use beamline_core::types::{ObjectiveId, ObjectiveStatus, Params};
use beamline_engine::{PlanNode, PredicateRegistry, StepDefinition, StepRegistry, WorkflowEngine};
use beamline_objective::{run_objective, ChannelRouter, NewObjective, ObjectiveRegistry};

fn supervised() -> (ObjectiveRegistry, mpsc::UnboundedReceiver<Signal>) {
    let router = Arc::new(ChannelRouter::new());
    let rx = router.subscribe("supervisor");
    let registry = ObjectiveRegistry::spawn(router, ObjectiveConfig::default(), None);
    (registry, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Signal>) -> Vec<Signal> {
    let mut signals = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        signals.push(signal);
    }
    signals
}

#[tokio::test]
async fn test_failed_objective_is_terminal() {
    let (registry, mut rx) = supervised();
    let id = registry
        .create(NewObjective::new("nightly export").description("copy ledgers to cold storage"))
        .await
        .unwrap();

    registry.start(&id).await.unwrap();
    registry.update_progress(&id, 40).await.unwrap();
    let report = registry.fail(&id, "network down").await.unwrap();

    assert_eq!(report.status, ObjectiveStatus::Failed);
    assert_eq!(report.progress, 40);
    assert_eq!(report.error.as_deref(), Some("network down"));

    let err = registry.complete(&id).await.unwrap_err();
    assert!(matches!(err, BeamlineError::InvalidTransition { .. }));
    assert_eq!(registry.get_status(&id).await.unwrap(), report);

    let signals = drain(&mut rx);
    let statuses: Vec<_> = signals
        .iter()
        .map(|s| (s.payload["status"].clone(), s.payload["progress"].clone()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (json!("in_progress"), json!(0)),
            (json!("in_progress"), json!(40)),
            (json!("failed"), json!(40)),
        ]
    );
    let last = signals.last().unwrap();
    assert_eq!(last.payload["error"], json!("network down"));
    assert_eq!(last.payload["objective_id"], json!(id.as_str()));
    assert_eq!(last.recipient, "supervisor");
    assert_eq!(last.schema_id, "objective.status");
}

#[tokio::test]
async fn test_one_signal_per_change() {
    let (registry, mut rx) = supervised();
    let id = registry.create(NewObjective::new("reindex")).await.unwrap();

    registry.start(&id).await.unwrap();
    registry.update_progress(&id, 10).await.unwrap();
    registry.update_progress(&id, 10).await.unwrap();
    registry.update_progress(&id, 60).await.unwrap();
    assert!(matches!(
        registry.update_progress(&id, 101).await,
        Err(BeamlineError::InvalidProgress(101))
    ));
    registry.complete(&id).await.unwrap();

    let progress: Vec<_> = drain(&mut rx)
        .iter()
        .map(|s| s.payload["progress"].clone())
        .collect();
    assert_eq!(progress, vec![json!(0), json!(10), json!(60), json!(100)]);
}

#[tokio::test]
async fn test_completed_objective_reports_full_progress() {
    let (registry, _rx) = supervised();
    let id = registry.create(NewObjective::new("compact")).await.unwrap();

    registry.start(&id).await.unwrap();
    registry.update_progress(&id, 5).await.unwrap();
    let report = registry.complete(&id).await.unwrap();
    assert_eq!(report.status, ObjectiveStatus::Completed);
    assert_eq!(report.progress, 100);
    assert!(report.error.is_none());

    let objective = registry.get(&id).await.unwrap();
    assert!(objective.started_at.is_some());
    assert!(objective.completed_at.is_some());
    assert!(registry.fail(&id, "late").await.is_err());
}

#[tokio::test]
async fn test_unknown_objective_is_not_found() {
    let (registry, mut rx) = supervised();
    let ghost = ObjectiveId::new();

    assert!(matches!(
        registry.get_status(&ghost).await,
        Err(BeamlineError::ObjectiveNotFound(_))
    ));
    assert!(matches!(
        registry.start(&ghost).await,
        Err(BeamlineError::ObjectiveNotFound(_))
    ));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_run_objective_end_to_end() {
    let (registry, mut rx) = supervised();
    let id = registry.create(NewObjective::new("pipeline")).await.unwrap();

    let engine = WorkflowEngine::new(
        Arc::new(StepRegistry::with_builtins()),
        Arc::new(PredicateRegistry::new()),
    )
    .with_event_bus(Arc::new(EventBus::new(64)));
    let plan = PlanNode::sequence(vec![
        StepDefinition::new("extract", "echo").into(),
        PlanNode::parallel(vec![
            StepDefinition::new("clean", "echo").into(),
            StepDefinition::new("enrich", "echo").into(),
        ]),
        StepDefinition::new("load", "echo").into(),
    ]);

    let run = run_objective(&registry, &id, &engine, &plan, Params::new())
        .await
        .unwrap();

    let report = run.outcome.expect("run succeeds");
    assert_eq!(report.context.len(), 4);
    assert_eq!(run.status.status, ObjectiveStatus::Completed);

    let progress: Vec<u64> = drain(&mut rx)
        .iter()
        .filter_map(|s| s.payload["progress"].as_u64())
        .collect();
    assert_eq!(progress.first(), Some(&0));
    assert_eq!(progress.last(), Some(&100));
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
}
