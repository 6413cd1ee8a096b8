use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use beamline_core::event::EventBus;
use beamline_core::types::{EngineEvent, RunId};

/// JSONL run logger.
///
/// Follows the EventBus and writes one JSON object per line for a single
/// run. Every line is flushed as soon as it is written, so a crash mid-run
/// leaves all previous lines intact.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

/// A single line of the JSONL file.
#[derive(Debug, Serialize)]
struct LogLine {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// `level` controls verbosity: 1=run summary, 2=+finished steps,
    /// 3=+attempts, retries and branch decisions.
    pub fn new(log_dir: impl Into<PathBuf>, level: u8) -> Self {
        Self {
            log_dir: log_dir.into(),
            level,
        }
    }

    /// Path of the file written for `run_id`.
    pub fn log_path(&self, run_id: &RunId) -> PathBuf {
        self.log_dir.join(format!("{}.jsonl", run_id))
    }

    /// Subscribe now and write in the background.
    ///
    /// Subscribing before the task starts guarantees no event of the run is
    /// missed, as long as this is called before the run begins.
    pub fn spawn(
        self,
        event_bus: &EventBus,
        run_id: RunId,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, run_id, cancel))
    }

    /// Write events of `run_id` until its RunComplete/RunError or cancellation.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<EngineEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let log_path = self.log_path(&run_id);
        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if event.run_id() != Some(&run_id) {
                                continue;
                            }
                            if let Some(line) = self.event_to_line(&event) {
                                if let Err(e) = write_line(&mut writer, &line).await {
                                    error!(error = %e, "Failed to write log entry");
                                    break;
                                }
                            }
                            if matches!(
                                event,
                                EngineEvent::RunComplete { .. } | EngineEvent::RunError { .. }
                            ) {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// Convert an event to a line (None if filtered by level).
    fn event_to_line(&self, event: &EngineEvent) -> Option<LogLine> {
        match event {
            // L1: run summary
            EngineEvent::RunStarted { run_id } => Some(line(run_id, "run_started", None, None)),
            EngineEvent::RunComplete {
                run_id,
                steps,
                elapsed_ms,
            } => Some(line(
                run_id,
                "run_complete",
                None,
                Some(serde_json::json!({ "steps": steps, "elapsed_ms": elapsed_ms })),
            )),
            EngineEvent::RunError { run_id, error } => Some(line(
                run_id,
                "run_error",
                None,
                Some(serde_json::json!({ "error": error })),
            )),

            // L2: finished steps
            EngineEvent::StepFinished {
                run_id,
                step_id,
                status,
                attempts,
                elapsed_ms,
            } if self.level >= 2 => Some(line(
                run_id,
                "step_finished",
                Some(step_id.as_str()),
                Some(serde_json::json!({
                    "status": status,
                    "attempts": attempts,
                    "elapsed_ms": elapsed_ms,
                })),
            )),

            // L3: attempts, retries and branch decisions
            EngineEvent::StepStarted {
                run_id,
                step_id,
                attempt,
            } if self.level >= 3 => Some(line(
                run_id,
                "step_started",
                Some(step_id.as_str()),
                Some(serde_json::json!({ "attempt": attempt })),
            )),
            EngineEvent::StepRetrying {
                run_id,
                step_id,
                attempt,
                delay_ms,
                reason,
            } if self.level >= 3 => Some(line(
                run_id,
                "step_retrying",
                Some(step_id.as_str()),
                Some(serde_json::json!({
                    "attempt": attempt,
                    "delay_ms": delay_ms,
                    "reason": truncate_str(reason, 200),
                })),
            )),
            EngineEvent::BranchTaken {
                run_id,
                predicate,
                taken,
                skipped_steps,
            } if self.level >= 3 => Some(line(
                run_id,
                "branch_taken",
                None,
                Some(serde_json::json!({
                    "predicate": predicate,
                    "taken": taken,
                    "skipped_steps": skipped_steps,
                })),
            )),

            _ => None,
        }
    }
}

fn line(
    run_id: &RunId,
    event_type: &'static str,
    step_id: Option<&str>,
    detail: Option<serde_json::Value>,
) -> LogLine {
    LogLine {
        timestamp: Utc::now().to_rfc3339(),
        run_id: run_id.to_string(),
        event_type,
        step_id: step_id.map(str::to_string),
        detail,
    }
}

async fn write_line(
    writer: &mut tokio::io::BufWriter<tokio::fs::File>,
    line: &LogLine,
) -> std::io::Result<()> {
    let json = serde_json::to_string(line)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Truncate a string for logging, respecting char boundaries.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Read back the lines written for a run.
pub fn read_log(path: &Path) -> std::io::Result<Vec<serde_json::Value>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(std::io::Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamline_core::types::OutcomeStatus;

    fn finished(run_id: &RunId) -> EngineEvent {
        EngineEvent::StepFinished {
            run_id: run_id.clone(),
            step_id: "fetch".into(),
            status: OutcomeStatus::Ok,
            attempts: 2,
            elapsed_ms: 10,
        }
    }

    fn started(run_id: &RunId) -> EngineEvent {
        EngineEvent::StepStarted {
            run_id: run_id.clone(),
            step_id: "fetch".into(),
            attempt: 1,
        }
    }

    #[test]
    fn test_line_skips_empty_fields() {
        let logger = RunLogger::new("/tmp", 1);
        let run_id = RunId::from_str("r1");
        let line = logger
            .event_to_line(&EngineEvent::RunStarted { run_id })
            .unwrap();
        let json = serde_json::to_string(&line).unwrap();
        assert!(json.contains("\"event_type\":\"run_started\""));
        assert!(!json.contains("step_id"));
        assert!(!json.contains("detail"));
    }

    #[test]
    fn test_event_level_filtering() {
        let run_id = RunId::from_str("r1");

        let logger = RunLogger::new("/tmp", 1);
        assert!(logger.event_to_line(&finished(&run_id)).is_none());
        assert!(logger.event_to_line(&started(&run_id)).is_none());

        let logger = RunLogger::new("/tmp", 2);
        let line = logger.event_to_line(&finished(&run_id)).unwrap();
        assert_eq!(line.step_id.as_deref(), Some("fetch"));
        assert!(logger.event_to_line(&started(&run_id)).is_none());

        let logger = RunLogger::new("/tmp", 3);
        assert!(logger.event_to_line(&started(&run_id)).is_some());
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        assert_eq!(truncate_str("héllo", 2), "h");
        assert_eq!(truncate_str("short", 10), "short");
    }

    #[tokio::test]
    async fn test_writes_only_its_run() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(32);
        let run_id = RunId::from_str("mine");
        let other = RunId::from_str("other");

        let logger = RunLogger::new(dir.path(), 2);
        let path = logger.log_path(&run_id);
        let handle = logger.spawn(&bus, run_id.clone(), CancellationToken::new());

        bus.publish(EngineEvent::RunStarted { run_id: run_id.clone() });
        bus.publish(EngineEvent::RunStarted { run_id: other.clone() });
        bus.publish(finished(&run_id));
        bus.publish(EngineEvent::RunComplete {
            run_id: run_id.clone(),
            steps: 1,
            elapsed_ms: 12,
        });
        handle.await.unwrap();

        let lines = read_log(&path).unwrap();
        let kinds: Vec<_> = lines.iter().map(|l| l["event_type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["run_started", "step_finished", "run_complete"]);
        assert!(lines.iter().all(|l| l["run_id"] == "mine"));
    }

    #[tokio::test]
    async fn test_cancel_stops_logger() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(8);
        let cancel = CancellationToken::new();
        let handle = RunLogger::new(dir.path(), 1).spawn(&bus, RunId::new(), cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
    }
}
