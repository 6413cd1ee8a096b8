//! Built-in step units.
//!
//! Integrations register their own units; these cover plumbing and testing
//! plans without external services.

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use beamline_core::error::StepFailure;
use beamline_core::traits::StepUnit;
use beamline_core::types::{Params, StepContext};

/// Returns its resolved parameters as an object.
pub struct EchoStep;

impl StepUnit for EchoStep {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the resolved parameters unchanged."
    }

    fn execute(
        &self,
        input: Params,
        _ctx: StepContext,
    ) -> BoxFuture<'_, Result<Value, StepFailure>> {
        Box::pin(async move { Ok(Value::Object(input)) })
    }
}

/// Returns the `value` parameter.
pub struct ConstStep;

impl StepUnit for ConstStep {
    fn name(&self) -> &str {
        "const"
    }

    fn description(&self) -> &str {
        "Return the `value` parameter (null when absent)."
    }

    fn execute(
        &self,
        mut input: Params,
        _ctx: StepContext,
    ) -> BoxFuture<'_, Result<Value, StepFailure>> {
        Box::pin(async move { Ok(input.remove("value").unwrap_or(Value::Null)) })
    }
}

/// Waits `ms` milliseconds, stopping early when the run is cancelled.
pub struct SleepStep;

impl StepUnit for SleepStep {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Wait `ms` milliseconds, then return the waited duration."
    }

    fn execute(
        &self,
        input: Params,
        ctx: StepContext,
    ) -> BoxFuture<'_, Result<Value, StepFailure>> {
        Box::pin(async move {
            let ms = input
                .get("ms")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| StepFailure::new("sleep requires a non-negative integer 'ms'"))?;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(Value::from(ms)),
                _ = ctx.cancel.cancelled() => Err(StepFailure::new("cancelled")),
            }
        })
    }
}

/// Always fails with the `reason` parameter.
pub struct FailStep;

impl StepUnit for FailStep {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Fail with the `reason` parameter."
    }

    fn execute(
        &self,
        input: Params,
        _ctx: StepContext,
    ) -> BoxFuture<'_, Result<Value, StepFailure>> {
        Box::pin(async move {
            let reason = input
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("step failed")
                .to_string();
            Err(StepFailure::new(reason))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beamline_core::types::RunId;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> StepContext {
        StepContext::new(RunId::new(), "s", 1, CancellationToken::new())
    }

    fn params(value: Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn echo_returns_params() {
        let out = EchoStep.execute(params(json!({"a": 1})), ctx()).await.unwrap();
        assert_eq!(out, json!({"a": 1}));
    }

    #[tokio::test]
    async fn const_returns_value() {
        let out = ConstStep.execute(params(json!({"value": [1, 2]})), ctx()).await.unwrap();
        assert_eq!(out, json!([1, 2]));
        let out = ConstStep.execute(Params::new(), ctx()).await.unwrap();
        assert_eq!(out, Value::Null);
    }

    #[tokio::test]
    async fn fail_uses_reason() {
        let err = FailStep
            .execute(params(json!({"reason": "network down"})), ctx())
            .await
            .unwrap_err();
        assert_eq!(err.reason, "network down");
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_waits_then_returns() {
        let out = SleepStep.execute(params(json!({"ms": 50})), ctx()).await.unwrap();
        assert_eq!(out, json!(50));
    }

    #[tokio::test]
    async fn sleep_stops_on_cancel() {
        let context = ctx();
        context.cancel.cancel();
        let err = SleepStep
            .execute(params(json!({"ms": 60_000})), context)
            .await
            .unwrap_err();
        assert_eq!(err.reason, "cancelled");
    }

    #[tokio::test]
    async fn sleep_requires_ms() {
        assert!(SleepStep.execute(Params::new(), ctx()).await.is_err());
    }
}
