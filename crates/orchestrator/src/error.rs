//! Error types for the query flow orchestrator.
//!
//! User-facing refusals and missing sources are not errors: they travel as
//! `success = false` responses. Only the failures below are represented as
//! error values.

use std::time::Duration;
use thiserror::Error;

/// Failures while partitioning tasks into execution groups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Cyclic dependency detected among tasks: {}", remaining.join(", "))]
    CyclicDependency { remaining: Vec<String> },

    #[error("Task '{0}' was registered more than once")]
    DuplicateTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },
}

/// Session broadcaster errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Streaming session '{0}' already exists")]
    SessionExists(String),
}

/// Delivery failure reported by a transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Client '{0}' is not connected")]
    ClientNotConnected(String),

    #[error("Client '{0}' closed its stream")]
    ClientClosed(String),

    #[error("Failed to encode event: {0}")]
    Encoding(String),
}

/// A stage of the query flow failed in a way the pipeline cannot absorb.
///
/// Caught once at the [`crate::flow::FlowController`] boundary and turned into
/// an apology response.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Stage '{stage}' timed out after {timeout:?}")]
    StageTimeout { stage: String, timeout: Duration },

    #[error("Execution planning failed: {0}")]
    Plan(#[from] PlanError),
}

impl FlowError {
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type FlowResult<T> = Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_remaining_tasks() {
        let err = PlanError::CyclicDependency {
            remaining: vec!["A".to_string(), "B".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic dependency detected among tasks: A, B"
        );
    }

    #[test]
    fn test_flow_error_from_plan_error() {
        let err: FlowError = PlanError::DuplicateTask("GuardrailsAgent".to_string()).into();
        assert!(matches!(err, FlowError::Plan(_)));
        assert!(err.to_string().contains("GuardrailsAgent"));
    }
}
