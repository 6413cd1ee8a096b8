use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use beamline_core::config::ObjectiveConfig;
use beamline_core::error::{BeamlineError, Result};
use beamline_core::event::EventBus;
use beamline_core::signal::Signal;
use beamline_core::traits::SignalRouter;
use beamline_core::types::{EngineEvent, ObjectiveId, Params};

use crate::machine::Transition;
use crate::objective::{NewObjective, Objective, ObjectiveStatusReport};

/// A request queued for the registry actor.
enum Command {
    Create {
        new: NewObjective,
        respond: oneshot::Sender<ObjectiveId>,
    },
    Transition {
        id: ObjectiveId,
        transition: Transition,
        respond: oneshot::Sender<Result<ObjectiveStatusReport>>,
    },
    Assign {
        id: ObjectiveId,
        agent_id: String,
        respond: oneshot::Sender<Result<()>>,
    },
    Status {
        id: ObjectiveId,
        respond: oneshot::Sender<Result<ObjectiveStatusReport>>,
    },
    Get {
        id: ObjectiveId,
        respond: oneshot::Sender<Result<Objective>>,
    },
    List {
        respond: oneshot::Sender<Vec<Objective>>,
    },
    Remove {
        id: ObjectiveId,
        respond: oneshot::Sender<Result<Objective>>,
    },
}

/// Handle to the process-wide set of objectives.
///
/// One actor task owns every objective and applies commands one at a time,
/// so concurrent `update_progress`/`fail`/`complete` calls never lose
/// updates. Handles are cheap to clone; the actor exits once all are dropped.
#[derive(Clone)]
pub struct ObjectiveRegistry {
    tx: mpsc::Sender<Command>,
}

impl ObjectiveRegistry {
    /// Start the registry actor on the current runtime.
    pub fn spawn(
        router: Arc<dyn SignalRouter>,
        config: ObjectiveConfig,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let actor = RegistryActor {
            objectives: HashMap::new(),
            router,
            config,
            event_bus,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(command(respond))
            .await
            .map_err(|_| BeamlineError::RegistryClosed)?;
        rx.await.map_err(|_| BeamlineError::RegistryClosed)
    }

    async fn transition(
        &self,
        id: &ObjectiveId,
        transition: Transition,
    ) -> Result<ObjectiveStatusReport> {
        let id = id.clone();
        self.request(|respond| Command::Transition {
            id,
            transition,
            respond,
        })
        .await?
    }

    /// Register a new objective in `pending`.
    pub async fn create(&self, new: NewObjective) -> Result<ObjectiveId> {
        self.request(|respond| Command::Create { new, respond }).await
    }

    pub async fn start(&self, id: &ObjectiveId) -> Result<ObjectiveStatusReport> {
        self.transition(id, Transition::Start).await
    }

    /// Set progress (0..=100). Only valid while in progress.
    pub async fn update_progress(
        &self,
        id: &ObjectiveId,
        progress: u32,
    ) -> Result<ObjectiveStatusReport> {
        self.transition(id, Transition::Progress(progress)).await
    }

    pub async fn complete(&self, id: &ObjectiveId) -> Result<ObjectiveStatusReport> {
        self.transition(id, Transition::Complete).await
    }

    pub async fn fail(
        &self,
        id: &ObjectiveId,
        reason: impl Into<String>,
    ) -> Result<ObjectiveStatusReport> {
        self.transition(id, Transition::Fail(reason.into())).await
    }

    /// Record which agent works on the objective. Emits no signal.
    pub async fn assign(&self, id: &ObjectiveId, agent_id: impl Into<String>) -> Result<()> {
        let id = id.clone();
        let agent_id = agent_id.into();
        self.request(|respond| Command::Assign {
            id,
            agent_id,
            respond,
        })
        .await?
    }

    pub async fn get_status(&self, id: &ObjectiveId) -> Result<ObjectiveStatusReport> {
        let id = id.clone();
        self.request(|respond| Command::Status { id, respond }).await?
    }

    /// Full record of one objective.
    pub async fn get(&self, id: &ObjectiveId) -> Result<Objective> {
        let id = id.clone();
        self.request(|respond| Command::Get { id, respond }).await?
    }

    /// All objectives, oldest first.
    pub async fn list(&self) -> Result<Vec<Objective>> {
        self.request(|respond| Command::List { respond }).await
    }

    /// Forget an objective. Any state may be removed.
    pub async fn remove(&self, id: &ObjectiveId) -> Result<Objective> {
        let id = id.clone();
        self.request(|respond| Command::Remove { id, respond }).await?
    }
}

struct RegistryActor {
    objectives: HashMap<ObjectiveId, Objective>,
    router: Arc<dyn SignalRouter>,
    config: ObjectiveConfig,
    event_bus: Option<Arc<EventBus>>,
}

impl RegistryActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(recipient = %self.config.recipient, "Objective registry started");
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        debug!(objectives = self.objectives.len(), "Objective registry stopped");
    }

    async fn handle(&mut self, command: Command) {
        // Ignore send errors: the caller may have given up waiting.
        match command {
            Command::Create { new, respond } => {
                let objective = Objective::new(new);
                let id = objective.id.clone();
                info!(objective_id = %id, name = %objective.name, "Objective created");
                self.objectives.insert(id.clone(), objective);
                let _ = respond.send(id);
            }
            Command::Transition {
                id,
                transition,
                respond,
            } => {
                let result = self.transition(&id, transition).await;
                let _ = respond.send(result);
            }
            Command::Assign {
                id,
                agent_id,
                respond,
            } => {
                let result = self
                    .lookup_mut(&id)
                    .and_then(|objective| objective.assign(agent_id));
                let _ = respond.send(result);
            }
            Command::Status { id, respond } => {
                let result = self.lookup(&id).map(|o| o.status_report());
                let _ = respond.send(result);
            }
            Command::Get { id, respond } => {
                let result = self.lookup(&id).cloned();
                let _ = respond.send(result);
            }
            Command::List { respond } => {
                let mut all: Vec<Objective> = self.objectives.values().cloned().collect();
                all.sort_by_key(|o| o.created_at);
                let _ = respond.send(all);
            }
            Command::Remove { id, respond } => {
                let result = self
                    .objectives
                    .remove(&id)
                    .ok_or_else(|| BeamlineError::ObjectiveNotFound(id.to_string()));
                if result.is_ok() {
                    debug!(objective_id = %id, "Objective removed");
                }
                let _ = respond.send(result);
            }
        }
    }

    fn lookup(&self, id: &ObjectiveId) -> Result<&Objective> {
        self.objectives
            .get(id)
            .ok_or_else(|| BeamlineError::ObjectiveNotFound(id.to_string()))
    }

    fn lookup_mut(&mut self, id: &ObjectiveId) -> Result<&mut Objective> {
        self.objectives
            .get_mut(id)
            .ok_or_else(|| BeamlineError::ObjectiveNotFound(id.to_string()))
    }

    async fn transition(
        &mut self,
        id: &ObjectiveId,
        transition: Transition,
    ) -> Result<ObjectiveStatusReport> {
        let action = transition.action();
        let objective = self.lookup_mut(id)?;
        let changed = match objective.apply(transition) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(objective_id = %id, action, error = %e, "Objective transition rejected");
                return Err(e);
            }
        };
        let report = objective.status_report();
        if !changed {
            return Ok(report);
        }

        info!(
            objective_id = %id,
            status = %report.status,
            progress = report.progress,
            "Objective transitioned"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(EngineEvent::ObjectiveTransition {
                objective_id: id.clone(),
                status: report.status,
                progress: report.progress,
            });
        }

        let signal = status_signal(&self.config, id, &report);
        self.route(signal).await;
        Ok(report)
    }

    /// Hand a signal to the router. Failures are reported, never undone.
    async fn route(&self, signal: Signal) {
        let signal_id = signal.id.clone();
        let recipient = signal.recipient.clone();
        let delivered = match self.router.route(signal).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    signal_id = %signal_id,
                    recipient = %recipient,
                    error = %e,
                    "Signal routing failed"
                );
                false
            }
        };
        if let Some(bus) = &self.event_bus {
            bus.publish(EngineEvent::SignalRouted {
                signal_id,
                recipient,
                delivered,
            });
        }
    }
}

fn status_signal(
    config: &ObjectiveConfig,
    id: &ObjectiveId,
    report: &ObjectiveStatusReport,
) -> Signal {
    let mut payload = Params::new();
    payload.insert("objective_id".into(), json!(id.as_str()));
    payload.insert("status".into(), json!(report.status.as_str()));
    payload.insert("progress".into(), json!(report.progress));
    if let Some(error) = &report.error {
        payload.insert("error".into(), json!(error));
    }
    Signal::new(
        config.signal_schema.clone(),
        payload,
        config.sender.clone(),
        config.recipient.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamline_core::types::ObjectiveStatus;
    use beamline_test_utils::{FailingRouter, RecordingRouter};
    use std::sync::atomic::Ordering;

    fn registry_with(router: Arc<dyn SignalRouter>) -> ObjectiveRegistry {
        ObjectiveRegistry::spawn(router, ObjectiveConfig::default(), None)
    }

    #[tokio::test]
    async fn test_lifecycle_emits_one_signal_per_change() {
        let router = RecordingRouter::new();
        let signals = router.signals();
        let registry = registry_with(Arc::new(router));

        let id = registry.create(NewObjective::new("report")).await.unwrap();
        registry.start(&id).await.unwrap();
        registry.update_progress(&id, 40).await.unwrap();
        registry.update_progress(&id, 40).await.unwrap();
        registry.complete(&id).await.unwrap();

        let signals = signals.lock().unwrap();
        let progress: Vec<_> = signals.iter().map(|s| s.payload["progress"].clone()).collect();
        assert_eq!(progress, vec![json!(0), json!(40), json!(100)]);
        assert_eq!(signals[2].payload["status"], "completed");
        assert_eq!(signals[0].recipient, "supervisor");
        assert_eq!(signals[0].schema_id, "objective.status");
        assert_eq!(signals[0].payload["objective_id"], json!(id.as_str()));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry = registry_with(Arc::new(RecordingRouter::new()));
        let ghost = ObjectiveId::new();
        assert!(matches!(
            registry.start(&ghost).await,
            Err(BeamlineError::ObjectiveNotFound(_))
        ));
        assert!(matches!(
            registry.get_status(&ghost).await,
            Err(BeamlineError::ObjectiveNotFound(_))
        ));
        assert!(registry.remove(&ghost).await.is_err());
        assert!(registry.assign(&ghost, "a").await.is_err());
    }

    #[tokio::test]
    async fn test_routing_failure_keeps_transition() {
        let router = FailingRouter::new();
        let attempts = router.attempts();
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let registry =
            ObjectiveRegistry::spawn(Arc::new(router), ObjectiveConfig::default(), Some(bus));

        let id = registry.create(NewObjective::new("x")).await.unwrap();
        let report = registry.start(&id).await.unwrap();
        assert_eq!(report.status, ObjectiveStatus::InProgress);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        let mut delivered = None;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::SignalRouted { delivered: d, .. } = event {
                delivered = Some(d);
            }
        }
        assert_eq!(delivered, Some(false));
    }

    #[tokio::test]
    async fn test_concurrent_progress_is_serialized() {
        let router = RecordingRouter::new();
        let signals = router.signals();
        let registry = registry_with(Arc::new(router));
        let id = registry.create(NewObjective::new("parallel")).await.unwrap();
        registry.start(&id).await.unwrap();

        let handles: Vec<_> = (1..=20u32)
            .map(|p| {
                let registry = registry.clone();
                let id = id.clone();
                tokio::spawn(async move { registry.update_progress(&id, p).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let last = signals.lock().unwrap().last().unwrap().payload["progress"].clone();
        let status = registry.get_status(&id).await.unwrap();
        assert_eq!(json!(status.progress), last);
    }

    #[tokio::test]
    async fn test_list_get_assign_remove() {
        let registry = registry_with(Arc::new(RecordingRouter::new()));
        let a = registry.create(NewObjective::new("a")).await.unwrap();
        let b = registry.create(NewObjective::new("b").description("second")).await.unwrap();

        registry.assign(&b, "agent-2").await.unwrap();
        let got = registry.get(&b).await.unwrap();
        assert_eq!(got.assigned_agent.as_deref(), Some("agent-2"));
        assert_eq!(got.description, "second");

        assert_eq!(registry.list().await.unwrap().len(), 2);
        registry.remove(&a).await.unwrap();
        let remaining = registry.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);
    }

    #[tokio::test]
    async fn test_progress_above_hundred_rejected() {
        let registry = registry_with(Arc::new(RecordingRouter::new()));
        let id = registry.create(NewObjective::new("p")).await.unwrap();
        registry.start(&id).await.unwrap();
        assert!(matches!(
            registry.update_progress(&id, 150).await,
            Err(BeamlineError::InvalidProgress(150))
        ));
        assert_eq!(registry.get_status(&id).await.unwrap().progress, 0);
    }
}
