//! Structured error types shared across VOL crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`VolError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (tags, iteration numbers, paths, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the operator resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the VOL campaign engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum VolError {
    /// Campaign configuration rejected before the run started.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Device bridge communication failures (read, write, reachability).
    #[error("bridge error: {0}")]
    Bridge(ErrorInfo),
    /// Measurement acquisition failures after retries were exhausted.
    #[error("measurement error: {0}")]
    Measurement(ErrorInfo),
    /// Optimizer ask/tell or state import/export failures.
    #[error("optimizer error: {0}")]
    Optimizer(ErrorInfo),
    /// Campaign lifecycle violations (bad state transition, cardinality mismatch).
    #[error("campaign error: {0}")]
    Campaign(ErrorInfo),
    /// Serialization and checkpoint layout errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl VolError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            VolError::Config(info)
            | VolError::Bridge(info)
            | VolError::Measurement(info)
            | VolError::Optimizer(info)
            | VolError::Campaign(info)
            | VolError::Serde(info) => info,
        }
    }

    /// Whether the error aborts only the in-flight iteration rather than the campaign.
    pub fn is_iteration_fatal(&self) -> bool {
        matches!(
            self,
            VolError::Measurement(_) | VolError::Campaign(_) | VolError::Bridge(_)
        )
    }
}
