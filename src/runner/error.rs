//! Runner errors and step output

use crate::core::{expression::ExpressionError, FailureKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error types for step execution
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{program} exited with code {code}")]
    ToolInvocation {
        program: String,
        code: i32,
        output: String,
    },

    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("environment setup failed: {message}")]
    EnvironmentSetup { message: String, output: String },

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("invalid expression: {0}")]
    Expression(#[from] ExpressionError),

    #[error("timeout after {0} seconds")]
    Timeout(u64),

    #[error("cancelled while running")]
    Cancelled,
}

impl RunnerError {
    /// Setup failure without captured output
    pub fn setup(message: impl Into<String>) -> Self {
        RunnerError::EnvironmentSetup {
            message: message.into(),
            output: String::new(),
        }
    }

    /// Failure class used in step records
    pub fn kind(&self) -> FailureKind {
        match self {
            RunnerError::ToolInvocation { .. } | RunnerError::Spawn { .. } => {
                FailureKind::ToolInvocation
            }
            RunnerError::EnvironmentSetup { .. }
            | RunnerError::UnsupportedAction(_)
            | RunnerError::Expression(_) => FailureKind::EnvironmentSetup,
            RunnerError::Timeout(_) => FailureKind::Timeout,
            RunnerError::Cancelled => FailureKind::Cancellation,
        }
    }

    /// Captured process output, if any
    pub fn output(&self) -> &str {
        match self {
            RunnerError::ToolInvocation { output, .. }
            | RunnerError::EnvironmentSetup { output, .. } => output,
            _ => "",
        }
    }
}

/// Output of a successful step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutput {
    /// Combined stdout and stderr
    pub output: String,

    /// Environment entries exported to later steps of the same instance
    pub exports: BTreeMap<String, String>,
}

impl StepOutput {
    pub fn new(output: String) -> Self {
        Self {
            output,
            exports: BTreeMap::new(),
        }
    }

    pub fn with_export(mut self, key: &str, value: &str) -> Self {
        self.exports.insert(key.to_string(), value.to_string());
        self
    }
}
