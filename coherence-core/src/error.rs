//! Custom error types for the coherence benchmark.
//!
//! Adapters surface exactly three failure kinds to callers
//! (`BackendUnavailable`, `OperationTimeout`, `Serialization`). A fourth,
//! `InvariantViolation`, is raised internally when a reader observes data
//! older than something already observed, and is never recovered.
//! No `Box<dyn Error>`, no `anyhow::Result` - all errors are strongly typed.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::VersionToken;

/// Top-level error type for the coherence benchmark.
#[derive(Debug, Error)]
pub enum CoherenceError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Adapter Errors - Never Retried at the Adapter Level
    // =========================================================================
    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    OperationTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Serialization error in {context}: {reason}")]
    Serialization { context: String, reason: String },

    // =========================================================================
    // Internal Errors - Always Fatal
    // =========================================================================
    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl CoherenceError {
    /// Build an `OperationTimeout` for the given bound.
    pub fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::OperationTimeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Build a `Serialization` error from any displayable cause.
    pub fn serialization(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Serialization {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is a bounded-wait timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::OperationTimeout { .. })
    }

    /// Whether this error must terminate the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// A reader observed a version older than one already known to exist.
///
/// Carries the key and both versions so the run can be diagnosed after abort.
#[derive(Debug, Clone, Error)]
#[error("{context}: key '{key}' expected version >= {expected}, observed {observed}")]
pub struct InvariantViolation {
    pub key: String,
    pub expected: VersionToken,
    pub observed: ObservedVersion,
    pub context: String,
}

/// What a reader actually saw when an invariant was checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedVersion {
    Missing,
    At(VersionToken),
}

impl std::fmt::Display for ObservedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "<missing>"),
            Self::At(version) => write!(f, "{}", version),
        }
    }
}

/// Hard validation errors reject a configuration before any backend starts.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Duplicate backend name: {name}")]
    DuplicateBackendName { name: String },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Result type alias using CoherenceError.
pub type CoherenceResult<T> = Result<T, CoherenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "name",
            context: "backend at index 2".to_string(),
        };
        assert!(err.to_string().contains("name"));
        assert!(err.to_string().contains("index 2"));
    }

    #[test]
    fn test_error_chain() {
        let validation_err = HardValidationError::DuplicateBackendName {
            name: "near-cache".to_string(),
        };
        let err: CoherenceError = validation_err.into();
        assert!(matches!(err, CoherenceError::HardValidation(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_timeout_classification() {
        let err = CoherenceError::timeout("read", Duration::from_millis(250));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_invariant_violation_is_fatal() {
        let err: CoherenceError = InvariantViolation {
            key: "u1".to_string(),
            expected: VersionToken::new(7),
            observed: ObservedVersion::At(VersionToken::new(3)),
            context: "read after visibility".to_string(),
        }
        .into();
        assert!(err.is_fatal());
        let message = err.to_string();
        assert!(message.contains("u1"));
        assert!(message.contains("v7"));
        assert!(message.contains("v3"));
    }
}
