//! Runner module - Solution supervisor
//!
//! This module resolves a day/level to a solution file and entry point,
//! starts one isolated worker per execution and waits for its verdict:
//! - `SolutionRunner`: the supervisor, turns worker events into a result or error
//! - `ProcessSpawner`: starts the worker as a child process of this executable
//!
//! The runner module does NOT:
//! - Normalize or submit answers
//! - Retry failed executions
//! - Enforce a timeout (a looping solution keeps the supervisor waiting)

pub mod process;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::answer::Answer;
use crate::config::SolutionLayout;
use crate::error::SolutionError;
use crate::protocol::{ExecutionRequest, ProtocolMessage};
use crate::puzzle::Level;

pub use process::ProcessSpawner;

/// Something observed on a running worker, in arrival order
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A protocol message from the message channel
    Message(ProtocolMessage),
    /// A failure from the native error channel (or an undecodable message)
    Error(SolutionError),
    /// The worker terminated with the given exit code
    Exit(Option<i32>),
}

/// Starts isolated workers
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Start a worker for `request` and return its event stream
    async fn spawn(
        &self,
        request: ExecutionRequest,
    ) -> Result<mpsc::Receiver<WorkerEvent>, SolutionError>;
}

#[async_trait]
impl<T: WorkerSpawner + ?Sized> WorkerSpawner for Arc<T> {
    async fn spawn(
        &self,
        request: ExecutionRequest,
    ) -> Result<mpsc::Receiver<WorkerEvent>, SolutionError> {
        (**self).spawn(request).await
    }
}

/// Shared destination for worker log messages
pub trait LogSink: Send + Sync {
    fn log(&self, level: &str, message: &str, meta: &[serde_json::Value]);
}

/// Relays worker logs as `tracing` events
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn log(&self, level: &str, message: &str, meta: &[serde_json::Value]) {
        let meta = serde_json::Value::Array(meta.to_vec());
        match level {
            "error" => error!(target: "aoc::solution", %meta, "{}", message),
            "warn" => warn!(target: "aoc::solution", %meta, "{}", message),
            "debug" => debug!(target: "aoc::solution", %meta, "{}", message),
            "trace" => trace!(target: "aoc::solution", %meta, "{}", message),
            _ => info!(target: "aoc::solution", %meta, "{}", message),
        }
    }
}

/// Successful execution of a solution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub answer: Answer,
    pub execution_time_ns: u64,
}

/// Supervisor for solution executions
pub struct SolutionRunner<S: WorkerSpawner> {
    layout: SolutionLayout,
    spawner: S,
    log_sink: Arc<dyn LogSink>,
}

impl<S: WorkerSpawner> SolutionRunner<S> {
    pub fn new(layout: SolutionLayout, spawner: S) -> Self {
        Self {
            layout,
            spawner,
            log_sink: Arc::new(TracingLogSink),
        }
    }

    #[cfg(test)]
    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = log_sink;
        self
    }

    /// Run the solution for `day`/`level` against `raw_input`
    pub async fn execute(
        &self,
        day: u8,
        level: Level,
        raw_input: &str,
    ) -> Result<ExecutionResult, SolutionError> {
        if raw_input.is_empty() {
            return Err(SolutionError::EmptyInput);
        }

        let solution_path = self.layout.solution_path(day);
        let function_name = self.layout.function_name(level);

        if !solution_path.is_file() {
            return Err(SolutionError::UserSolutionFileNotFound {
                path: solution_path,
            });
        }

        debug!(
            "Executing {} from {}",
            function_name,
            solution_path.display()
        );

        let request = ExecutionRequest::new(solution_path, function_name, raw_input);
        let mut events = self.spawner.spawn(request).await?;

        // Returning drops the receiver; nothing is processed after settling
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Message(ProtocolMessage::Log {
                    level,
                    message,
                    meta,
                }) => {
                    self.log_sink.log(&level, &message, &meta);
                }
                WorkerEvent::Message(ProtocolMessage::Answer {
                    answer,
                    execution_time_ns,
                }) => {
                    return Ok(ExecutionResult {
                        answer,
                        execution_time_ns,
                    });
                }
                WorkerEvent::Message(ProtocolMessage::AnswerTypeInvalid { answer_type }) => {
                    return Err(SolutionError::AnswerTypeInvalid { answer_type });
                }
                WorkerEvent::Error(error) => return Err(error),
                WorkerEvent::Exit(code) => return Err(SolutionError::ExitWithoutAnswer { code }),
            }
        }

        Err(SolutionError::ExitWithoutAnswer { code: None })
    }
}
