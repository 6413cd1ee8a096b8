use std::collections::HashMap;
use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, info};

use beamline_core::error::{BeamlineError, Result};
use beamline_core::signal::Signal;
use beamline_core::traits::SignalRouter;

/// In-process router: each recipient owns an unbounded channel.
#[derive(Default)]
pub struct ChannelRouter {
    recipients: Mutex<HashMap<String, mpsc::UnboundedSender<Signal>>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `recipient` and return its inbox. Re-subscribing replaces
    /// the previous inbox.
    pub fn subscribe(&self, recipient: impl Into<String>) -> mpsc::UnboundedReceiver<Signal> {
        let (tx, rx) = mpsc::unbounded_channel();
        let recipient = recipient.into();
        debug!(recipient = %recipient, "Recipient subscribed");
        self.recipients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(recipient, tx);
        rx
    }

    pub fn recipients(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .recipients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn deliver(&self, signal: Signal) -> Result<()> {
        let mut recipients = self.recipients.lock().unwrap_or_else(|e| e.into_inner());
        let recipient = signal.recipient.clone();
        let tx = recipients
            .get(&recipient)
            .ok_or_else(|| BeamlineError::Routing(format!("no recipient '{}'", recipient)))?;

        if tx.send(signal).is_err() {
            recipients.remove(&recipient);
            return Err(BeamlineError::Routing(format!(
                "recipient '{}' is no longer listening",
                recipient
            )));
        }
        Ok(())
    }
}

impl SignalRouter for ChannelRouter {
    fn route(&self, signal: Signal) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.deliver(signal) })
    }
}

/// Router that only writes signals to the trace log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRouter;

impl SignalRouter for LogRouter {
    fn route(&self, signal: Signal) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(
                signal_id = %signal.id,
                schema = %signal.schema_id,
                sender = %signal.sender,
                recipient = %signal.recipient,
                payload = %serde_json::Value::Object(signal.payload),
                "Signal"
            );
            Ok(())
        })
    }
}
