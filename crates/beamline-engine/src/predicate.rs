use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use beamline_core::error::{BeamlineError, Result};
use beamline_core::traits::Predicate;

use crate::path;

/// How a branch names its predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateRef {
    /// A predicate registered in the `PredicateRegistry`.
    Named(String),
    /// An inline expression such as `fetch.value > 10`.
    Expr(String),
}

impl PredicateRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn expr(expr: impl Into<String>) -> Self {
        Self::Expr(expr.into())
    }

    /// Short label for logs and events.
    pub fn label(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Expr(expr) => expr,
        }
    }
}

/// Comparison operator of an inline expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

// Longest tokens first so `>=` wins over `>`.
const OPERATORS: [(&str, Operator); 7] = [
    (" contains ", Operator::Contains),
    ("==", Operator::Eq),
    ("!=", Operator::Ne),
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    (">", Operator::Gt),
    ("<", Operator::Lt),
];

/// A parsed inline predicate.
///
/// Supported forms:
/// - `path OP literal` where OP is one of `== != > >= < <= contains`
/// - `path` (truthy) and `!path` (falsy)
///
/// Paths are resolved against the context snapshot, so `fetch.value` reads
/// the value step `fetch` produced and `input.limit` reads the run input.
/// Literals are JSON (`10`, `"text"`, `true`, `null`); single-quoted or bare
/// words are taken as strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Truthy { path: String, negate: bool },
    Compare { path: String, op: Operator, literal: Value },
}

impl Expression {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(BeamlineError::InvalidPlan("empty predicate expression".into()));
        }

        match split_operator(expr) {
            Some((lhs, op, rhs)) => {
                let path = lhs.trim();
                let rhs = rhs.trim();
                if path.is_empty() || rhs.is_empty() {
                    return Err(BeamlineError::InvalidPlan(format!(
                        "malformed predicate expression '{}'",
                        expr
                    )));
                }
                Ok(Self::Compare {
                    path: path.to_string(),
                    op,
                    literal: parse_literal(rhs),
                })
            }
            None => {
                let (negate, path) = match expr.strip_prefix('!') {
                    Some(rest) => (true, rest.trim()),
                    None => (false, expr),
                };
                if path.is_empty() || path.contains(char::is_whitespace) {
                    return Err(BeamlineError::InvalidPlan(format!(
                        "malformed predicate expression '{}'",
                        expr
                    )));
                }
                Ok(Self::Truthy {
                    path: path.to_string(),
                    negate,
                })
            }
        }
    }

    /// Evaluate against a context snapshot. A missing path makes every
    /// comparison false.
    pub fn evaluate(&self, snapshot: &Value) -> bool {
        match self {
            Self::Truthy { path, negate } => {
                let truthy = path::lookup(snapshot, path).is_some_and(is_truthy);
                truthy != *negate
            }
            Self::Compare { path, op, literal } => match path::lookup(snapshot, path) {
                Some(value) => compare(value, *op, literal),
                None => false,
            },
        }
    }
}

/// Find the first operator outside of quotes.
fn split_operator(expr: &str) -> Option<(&str, Operator, &str)> {
    let mut quote: Option<char> = None;
    for (i, c) in expr.char_indices() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                continue;
            }
            Some(_) => continue,
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                continue;
            }
            None => {}
        }
        let rest = &expr[i..];
        for (token, op) in OPERATORS {
            if rest.starts_with(token) {
                return Some((&expr[..i], op, &rest[token.len()..]));
            }
        }
    }
    None
}

fn parse_literal(raw: &str) -> Value {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn compare(value: &Value, op: Operator, literal: &Value) -> bool {
    use std::cmp::Ordering;

    let ordering = || -> Option<Ordering> {
        match (value, literal) {
            (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    };

    match op {
        Operator::Eq => values_equal(value, literal),
        Operator::Ne => !values_equal(value, literal),
        Operator::Gt => ordering() == Some(Ordering::Greater),
        Operator::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => ordering() == Some(Ordering::Less),
        Operator::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        Operator::Contains => match (value, literal) {
            (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
    }
}

/// Registry of named branch predicates.
pub struct PredicateRegistry {
    predicates: HashMap<String, Arc<dyn Predicate>>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self {
            predicates: HashMap::new(),
        }
    }

    /// Register a predicate under a name.
    pub fn register(&mut self, name: impl Into<String>, predicate: impl Predicate) {
        self.predicates.insert(name.into(), Arc::new(predicate));
    }

    /// Unregister a predicate by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.predicates.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Predicate>> {
        self.predicates.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.predicates.keys().map(|s| s.as_str()).collect()
    }

    /// Check that a reference can be evaluated (registered name or parseable expression).
    pub fn check(&self, predicate: &PredicateRef) -> Result<()> {
        match predicate {
            PredicateRef::Named(name) if self.predicates.contains_key(name) => Ok(()),
            PredicateRef::Named(name) => Err(BeamlineError::PredicateNotFound(name.clone())),
            PredicateRef::Expr(expr) => Expression::parse(expr).map(|_| ()),
        }
    }

    /// Evaluate a predicate reference against a context snapshot.
    pub fn evaluate(&self, predicate: &PredicateRef, snapshot: &Value) -> Result<bool> {
        match predicate {
            PredicateRef::Named(name) => {
                let predicate = self
                    .get(name)
                    .ok_or_else(|| BeamlineError::PredicateNotFound(name.clone()))?;
                Ok(predicate.evaluate(snapshot))
            }
            PredicateRef::Expr(expr) => Ok(Expression::parse(expr)?.evaluate(snapshot)),
        }
    }
}

impl Default for PredicateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
