//! Device context values queried by transition guards.
//!
//! A [`Context`] is a small key/value snapshot of sensor readings and
//! flags (e.g. `sensor_clear = true`, `temperature = 41.5`) handed to the
//! state machine alongside an event. Typed accessors return a
//! [`ContextError`] when a field is missing or has the wrong type, which
//! the state machine treats as "guard not satisfied".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single context value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Name of the variant, used in error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Failure to read a typed field out of a [`Context`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context field '{0}' is missing")]
    MissingField(String),

    #[error("context field '{field}' is {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Key/value snapshot of device data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Read a boolean field.
    pub fn bool(&self, key: &str) -> Result<bool, ContextError> {
        match self.require(key)? {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch(key, "bool", other)),
        }
    }

    /// Read a numeric field.
    pub fn number(&self, key: &str) -> Result<f64, ContextError> {
        match self.require(key)? {
            Value::Number(n) => Ok(*n),
            other => Err(mismatch(key, "number", other)),
        }
    }

    /// Read a text field.
    pub fn text(&self, key: &str) -> Result<&str, ContextError> {
        match self.require(key)? {
            Value::Text(s) => Ok(s.as_str()),
            other => Err(mismatch(key, "text", other)),
        }
    }

    fn require(&self, key: &str) -> Result<&Value, ContextError> {
        self.values
            .get(key)
            .ok_or_else(|| ContextError::MissingField(key.to_owned()))
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> ContextError {
    ContextError::TypeMismatch {
        field: key.to_owned(),
        expected,
        found: found.kind(),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
