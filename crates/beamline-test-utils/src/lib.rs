//! Mock step units and signal routers shared by the Beamline test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use beamline_core::error::{BeamlineError, Result, StepFailure};
use beamline_core::signal::Signal;
use beamline_core::traits::{SignalRouter, StepUnit};
use beamline_core::types::{Params, StepContext};

/// Fails the first `failures` calls, then returns `value`.
pub struct FlakyStep {
    name: String,
    failures: usize,
    value: Value,
    calls: Arc<AtomicUsize>,
}

impl FlakyStep {
    pub fn new(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self {
            name: name.into(),
            failures,
            value,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl StepUnit for FlakyStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        _input: Params,
        ctx: StepContext,
    ) -> BoxFuture<'_, std::result::Result<Value, StepFailure>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(StepFailure::new(format!(
                    "transient failure {} of {} (attempt {})",
                    call, self.failures, ctx.attempt
                )))
            } else {
                Ok(self.value.clone())
            }
        })
    }
}

/// Always fails with the same reason.
pub struct AlwaysFails {
    name: String,
    reason: String,
    calls: Arc<AtomicUsize>,
}

impl AlwaysFails {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl StepUnit for AlwaysFails {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        _input: Params,
        _ctx: StepContext,
    ) -> BoxFuture<'_, std::result::Result<Value, StepFailure>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StepFailure::new(self.reason.clone()))
        })
    }
}

/// Always returns the same value.
pub struct AlwaysSucceeds {
    name: String,
    value: Value,
    calls: Arc<AtomicUsize>,
}

impl AlwaysSucceeds {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl StepUnit for AlwaysSucceeds {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        _input: Params,
        _ctx: StepContext,
    ) -> BoxFuture<'_, std::result::Result<Value, StepFailure>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.clone())
        })
    }
}

/// Sleeps for `delay` before returning `value`. Ignores cancellation.
pub struct SlowStep {
    name: String,
    delay: Duration,
    value: Value,
    calls: Arc<AtomicUsize>,
}

impl SlowStep {
    pub fn new(name: impl Into<String>, delay: Duration, value: Value) -> Self {
        Self {
            name: name.into(),
            delay,
            value,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl StepUnit for SlowStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        _input: Params,
        _ctx: StepContext,
    ) -> BoxFuture<'_, std::result::Result<Value, StepFailure>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.value.clone())
        })
    }
}

/// Records every resolved input and returns it back.
pub struct RecordingStep {
    name: String,
    inputs: Arc<Mutex<Vec<Params>>>,
}

impl RecordingStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Inputs seen so far, in call order.
    pub fn inputs(&self) -> Arc<Mutex<Vec<Params>>> {
        self.inputs.clone()
    }
}

impl StepUnit for RecordingStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        input: Params,
        _ctx: StepContext,
    ) -> BoxFuture<'_, std::result::Result<Value, StepFailure>> {
        Box::pin(async move {
            self.inputs.lock().unwrap().push(input.clone());
            Ok(Value::Object(input))
        })
    }
}

/// Router that keeps every signal it is handed.
#[derive(Default)]
pub struct RecordingRouter {
    signals: Arc<Mutex<Vec<Signal>>>,
}

impl RecordingRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals routed so far, in order.
    pub fn signals(&self) -> Arc<Mutex<Vec<Signal>>> {
        self.signals.clone()
    }
}

impl SignalRouter for RecordingRouter {
    fn route(&self, signal: Signal) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.signals.lock().unwrap().push(signal);
            Ok(())
        })
    }
}

/// Router whose deliveries always fail.
pub struct FailingRouter {
    attempts: Arc<AtomicUsize>,
}

impl FailingRouter {
    pub fn new() -> Self {
        Self {
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> Arc<AtomicUsize> {
        self.attempts.clone()
    }
}

impl Default for FailingRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalRouter for FailingRouter {
    fn route(&self, signal: Signal) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(BeamlineError::Routing(format!(
                "recipient '{}' unreachable",
                signal.recipient
            )))
        })
    }
}
