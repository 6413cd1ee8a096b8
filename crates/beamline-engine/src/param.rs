//! Parameter resolution.
//!
//! A step declares its parameters as literals or references; resolution turns
//! them into concrete values against the run's execution context. Resolution
//! is a pure function of its inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use beamline_core::error::ResolutionError;
use beamline_core::types::Params;

use crate::context::ExecutionContext;
use crate::path;

/// A declared step parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawParam {
    /// A constant value.
    Literal(Value),
    /// A path into the value a previous step produced.
    Ref {
        step: String,
        #[serde(default)]
        path: String,
    },
    /// A path into the run input.
    Input {
        #[serde(default)]
        path: String,
    },
}

impl RawParam {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn step_ref(step: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Ref {
            step: step.into(),
            path: path.into(),
        }
    }

    pub fn input(path: impl Into<String>) -> Self {
        Self::Input { path: path.into() }
    }

    /// Resolve a single parameter against the context.
    pub fn resolve(&self, context: &ExecutionContext) -> Result<Value, ResolutionError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Input { path } => {
                let input = Value::Object(context.input().clone());
                path::lookup(&input, path)
                    .cloned()
                    .ok_or_else(|| ResolutionError::UnresolvedPath {
                        target: "run input".to_string(),
                        path: path.clone(),
                    })
            }
            Self::Ref { step, path } => {
                let value = context
                    .value(step)
                    .ok_or_else(|| ResolutionError::UnresolvedStep {
                        step_id: step.clone(),
                    })?;
                path::lookup(value, path)
                    .cloned()
                    .ok_or_else(|| ResolutionError::UnresolvedPath {
                        target: format!("output of step '{}'", step),
                        path: path.clone(),
                    })
            }
        }
    }
}

impl From<Value> for RawParam {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// Resolve every declared parameter, failing on the first unresolved reference.
pub fn resolve(
    params: &BTreeMap<String, RawParam>,
    context: &ExecutionContext,
) -> Result<Params, ResolutionError> {
    params
        .iter()
        .map(|(name, raw)| raw.resolve(context).map(|value| (name.clone(), value)))
        .collect()
}
