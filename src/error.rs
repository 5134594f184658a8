//! Error types for the research pipeline.
//!
//! Collaborator failures (`GenerationError`, `SearchError`) carry a
//! `transient` flag. The invoker folds both into [`CapabilityError`] to decide
//! whether to retry, and reports exhaustion through [`InvokeError`]. Stages
//! never leak any of these: the executor turns them into a [`StageError`]
//! recorded on the state.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::state::StageKind;

/// Failure reported by a text-generation collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct GenerationError {
    /// Whether the same request may succeed if repeated
    pub transient: bool,
    pub message: String,
}

impl GenerationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

/// Failure reported by a web-search collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SearchError {
    /// Whether the same request may succeed if repeated
    pub transient: bool,
    pub message: String,
}

impl SearchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }
}

/// A single failed attempt against one endpoint, classified for retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Rate limit, timeout, connection failure, 5xx
    #[error("transient: {0}")]
    Transient(String),

    /// Bad request, auth failure, malformed or empty response
    #[error("permanent: {0}")]
    Permanent(String),
}

impl CapabilityError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CapabilityError::Transient(_))
    }
}

impl From<GenerationError> for CapabilityError {
    fn from(e: GenerationError) -> Self {
        if e.transient {
            CapabilityError::Transient(e.message)
        } else {
            CapabilityError::Permanent(e.message)
        }
    }
}

impl From<SearchError> for CapabilityError {
    fn from(e: SearchError) -> Self {
        if e.transient {
            CapabilityError::Transient(e.message)
        } else {
            CapabilityError::Permanent(e.message)
        }
    }
}

/// Why one endpoint was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    pub endpoint: String,
    /// Attempts made against this endpoint (at least 1)
    pub attempts: usize,
    /// The last error seen on this endpoint
    pub error: CapabilityError,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.endpoint, self.attempts, self.error
        )
    }
}

/// Errors from the fallback-capable invoker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("all endpoints exhausted: {}", join_failures(.failures))]
    AllEndpointsExhausted { failures: Vec<EndpointFailure> },
}

impl InvokeError {
    /// Per-endpoint failure reasons, in endpoint order.
    pub fn failures(&self) -> &[EndpointFailure] {
        match self {
            InvokeError::NoEndpoints => &[],
            InvokeError::AllEndpointsExhausted { failures } => failures,
        }
    }
}

fn join_failures(failures: &[EndpointFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Normalized failure of one stage, stored in `ResearchState::error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} stage failed: {cause}")]
pub struct StageError {
    pub stage: StageKind,
    pub cause: String,
}

impl StageError {
    pub fn new(stage: StageKind, cause: impl Into<String>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }
}

/// Run-level failures that happen outside any single stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("pipeline timed out after {}s while running {stage}", .elapsed.as_secs_f64())]
    Timeout { elapsed: Duration, stage: String },
}

/// Configuration loading and validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("{0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_classification() {
        let transient: CapabilityError = GenerationError::transient("429 Too Many Requests").into();
        assert!(transient.is_transient());

        let permanent: CapabilityError = GenerationError::permanent("bad request").into();
        assert!(!permanent.is_transient());
        assert_eq!(permanent.to_string(), "permanent: bad request");
    }

    #[test]
    fn test_search_error_classification() {
        let err: CapabilityError = SearchError::transient("timed out").into();
        assert_eq!(err, CapabilityError::Transient("timed out".to_string()));
    }

    #[test]
    fn test_exhausted_display_lists_endpoints_in_order() {
        let err = InvokeError::AllEndpointsExhausted {
            failures: vec![
                EndpointFailure {
                    endpoint: "model-a".to_string(),
                    attempts: 1,
                    error: CapabilityError::Permanent("unauthorized".to_string()),
                },
                EndpointFailure {
                    endpoint: "model-b".to_string(),
                    attempts: 3,
                    error: CapabilityError::Transient("overloaded".to_string()),
                },
            ],
        };

        let text = err.to_string();
        let a = text.find("model-a").unwrap();
        let b = text.find("model-b").unwrap();
        assert!(a < b);
        assert!(text.contains("3 attempt(s)"));
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn test_stage_error_names_stage() {
        let err = StageError::new(StageKind::FactCheck, "no document to check");
        assert_eq!(err.to_string(), "fact_check stage failed: no document to check");
    }

    #[test]
    fn test_timeout_display() {
        let err = PipelineError::Timeout {
            elapsed: Duration::from_millis(1500),
            stage: "draft".to_string(),
        };
        assert_eq!(err.to_string(), "pipeline timed out after 1.5s while running draft");
    }
}
