//! Solution execution errors
//!
//! One closed enum covers every way running a user solution can fail. The
//! worker serializes these onto its native error channel, so the enum is
//! also part of the worker wire format.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Who has to fix the problem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blame {
    /// The user's solution or puzzle data
    User,
    /// This tool
    Tool,
}

/// A value thrown by user code, kept for diagnostic display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrownValue {
    /// Error constructor name (`RangeError`), or the runtime type for non-Error throws
    pub name: String,
    pub message: String,
    /// The thrown object's own `stack` string, when it has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl std::error::Error for ThrownValue {}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolutionError {
    #[error("Puzzle input is empty")]
    EmptyInput,

    #[error("Solution file not found: {}. Create it and export the level functions.", path.display())]
    UserSolutionFileNotFound { path: PathBuf },

    #[error("Solution file {} failed to parse: {message}", path.display())]
    UserSolutionSyntaxError { path: PathBuf, message: String },

    #[error("Solution file {} does not export a function named `{function}`", path.display())]
    UserSolutionMissingFunction { path: PathBuf, function: String },

    #[error("Solution `{function}` threw {cause}")]
    UserSolutionThrew {
        function: String,
        #[source]
        cause: ThrownValue,
    },

    #[error("Solution returned an invalid answer type: {answer_type}")]
    AnswerTypeInvalid { answer_type: String },

    #[error("Worker exited without sending an answer (exit code {code:?})")]
    ExitWithoutAnswer { code: Option<i32> },

    #[error("Worker data is missing required field `{field}`")]
    MissingWorkerData { field: String },

    #[error("Worker protocol violation: {message}")]
    Protocol { message: String },

    #[error("Failed to start worker: {message}")]
    Spawn { message: String },

    #[error("Worker failed: {message}")]
    Internal { message: String },
}

impl SolutionError {
    pub fn blame(&self) -> Blame {
        match self {
            SolutionError::EmptyInput
            | SolutionError::UserSolutionFileNotFound { .. }
            | SolutionError::UserSolutionSyntaxError { .. }
            | SolutionError::UserSolutionMissingFunction { .. }
            | SolutionError::UserSolutionThrew { .. }
            | SolutionError::AnswerTypeInvalid { .. } => Blame::User,
            SolutionError::ExitWithoutAnswer { .. }
            | SolutionError::MissingWorkerData { .. }
            | SolutionError::Protocol { .. }
            | SolutionError::Spawn { .. }
            | SolutionError::Internal { .. } => Blame::Tool,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        SolutionError::Protocol {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SolutionError::Internal {
            message: message.into(),
        }
    }
}

/// Record a failed worker writes to stderr before exiting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub error: SolutionError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_blame() {
        assert_eq!(SolutionError::EmptyInput.blame(), Blame::User);
        assert_eq!(
            SolutionError::AnswerTypeInvalid {
                answer_type: "object".into()
            }
            .blame(),
            Blame::User
        );
        assert_eq!(
            SolutionError::ExitWithoutAnswer { code: Some(0) }.blame(),
            Blame::Tool
        );
        assert_eq!(
            SolutionError::MissingWorkerData {
                field: "input".into()
            }
            .blame(),
            Blame::Tool
        );
    }

    #[test]
    fn test_thrown_value_is_the_source() {
        let err = SolutionError::UserSolutionThrew {
            function: "levelOne".into(),
            cause: ThrownValue {
                name: "RangeError".into(),
                message: "boom".into(),
                stack: None,
            },
        };

        assert_eq!(err.to_string(), "Solution `levelOne` threw RangeError: boom");
        let source = err.source().unwrap();
        let thrown = source.downcast_ref::<ThrownValue>().unwrap();
        assert_eq!(thrown.name, "RangeError");
    }

    #[test]
    fn test_thrown_stack_crosses_the_wire() {
        let failure = WorkerFailure {
            error: SolutionError::UserSolutionThrew {
                function: "levelOne".into(),
                cause: ThrownValue {
                    name: "Error".into(),
                    message: "x".into(),
                    stack: Some("at levelOne (day01.js:3)".into()),
                },
            },
        };

        let json = serde_json::to_string(&failure).unwrap();
        let parsed: WorkerFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, failure);

        let without: ThrownValue = serde_json::from_str(r#"{"name":"Error","message":"x"}"#).unwrap();
        assert_eq!(without.stack, None);
    }

    #[test]
    fn test_failure_record_wire_format() {
        let failure = WorkerFailure {
            error: SolutionError::UserSolutionMissingFunction {
                path: PathBuf::from("solutions/day05.js"),
                function: "levelTwo".into(),
            },
        };

        let json = serde_json::to_string(&failure).unwrap();
        assert!(json.contains("\"kind\":\"user_solution_missing_function\""));
        let parsed: WorkerFailure = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, failure);
    }
}
