//! Domain error types for the CoS supervisor.
//!
//! This module defines all error types using thiserror for structured error
//! handling. Each error enum represents errors from a specific subsystem.

use thiserror::Error;

/// Errors from the state store and its satellite files.
#[derive(Error, Debug)]
pub enum StateError {
    /// Reading or writing a persisted document failed
    #[error("I/O failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A persisted document could not be parsed; the caller backed it up
    /// and fell back to defaults
    #[error("Corrupt document at {path}: {detail}")]
    Corrupt { path: String, detail: String },

    /// Serializing a document for write failed
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StateError {
    /// Returns true if this error is transient and the operation can be
    /// retried at the next tick.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from schedule evaluation and mutation.
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// No schedule entry exists for the task type
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    /// On-demand request id was not found in the queue
    #[error("On-demand request not found: {0}")]
    RequestNotFound(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors from the learning store.
#[derive(Error, Debug)]
pub enum LearningError {
    /// An agent completion arrived without a result attached
    #[error("Agent {0} has no result to record")]
    MissingResult(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors from the orchestrator's own machinery.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The orchestrator is not running
    #[error("Orchestrator is stopped")]
    Stopped,

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Learning(#[from] LearningError),

    /// A collaborator (task source, spawner) failed
    #[error("Collaborator failure: {0}")]
    Collaborator(String),
}

impl OrchestratorError {
    /// Returns true if the next tick may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Stopped => false,
            Self::State(e) => e.is_transient(),
            Self::Schedule(ScheduleError::State(e)) => e.is_transient(),
            Self::Learning(LearningError::State(e)) => e.is_transient(),
            Self::Schedule(_) | Self::Learning(_) => false,
            Self::Collaborator(_) => true,
        }
    }
}

/// Structured failures surfaced by synchronous mutation APIs. These map to
/// the wire codes the HTTP boundary forwards unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Bad request shape
    #[error("VALIDATION_ERROR: {0}")]
    Validation(String),

    /// Target id unknown
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// Illegal state transition
    #[error("BAD_REQUEST: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// Stable wire code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_error_display() {
        let err = StateError::Corrupt {
            path: "cos/state.json".into(),
            detail: "expected value at line 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Corrupt document at cos/state.json: expected value at line 1"
        );
    }

    #[test]
    fn test_state_error_transience() {
        let io = StateError::io(
            "cos/state.json",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(io.is_transient());

        let corrupt = StateError::Corrupt {
            path: "x".into(),
            detail: "y".into(),
        };
        assert!(!corrupt.is_transient());
    }

    #[test]
    fn test_orchestrator_error_transience() {
        assert!(!OrchestratorError::Stopped.is_transient());
        assert!(OrchestratorError::Collaborator("spawner down".into()).is_transient());
        assert!(!OrchestratorError::Schedule(ScheduleError::UnknownTaskType("x".into()))
            .is_transient());
    }

    #[test]
    fn test_api_error_codes() {
        assert_eq!(ApiError::Validation("bad".into()).code(), "VALIDATION_ERROR");
        assert_eq!(ApiError::NotFound("agent-1".into()).code(), "NOT_FOUND");
        assert_eq!(
            ApiError::BadRequest("already completed".into()).code(),
            "BAD_REQUEST"
        );
        assert_eq!(
            ApiError::NotFound("agent-1".into()).to_string(),
            "NOT_FOUND: agent-1"
        );
    }
}
