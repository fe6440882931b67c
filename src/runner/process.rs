//! Child-process worker spawner
//!
//! Re-executes this binary with the hidden `worker` subcommand. The request is
//! written to the child's stdin, protocol lines are read from its stdout and a
//! failure record is read from its stderr.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{WorkerEvent, WorkerSpawner};
use crate::error::{SolutionError, WorkerFailure};
use crate::protocol::{decode_line, ExecutionRequest};

const EVENT_BUFFER: usize = 64;

/// Spawner that runs each worker as a separate OS process
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
    /// Removed from the child's environment
    redacted_env: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>, redacted_env: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            redacted_env,
        }
    }

    /// Spawner for `<this executable> worker`
    pub fn current_exe(redacted_env: Vec<String>) -> anyhow::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, vec!["worker".into()], redacted_env))
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(
        &self,
        request: ExecutionRequest,
    ) -> Result<mpsc::Receiver<WorkerEvent>, SolutionError> {
        let payload = serde_json::to_vec(&request)
            .map_err(|e| SolutionError::internal(format!("Failed to encode worker data: {}", e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for name in &self.redacted_env {
            cmd.env_remove(name);
        }

        let mut child = cmd.spawn().map_err(|e| SolutionError::Spawn {
            message: format!("{}: {}", self.program.display(), e),
        })?;
        debug!("Spawned worker pid {:?}", child.id());

        let (mut stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => {
                    return Err(SolutionError::Spawn {
                        message: "worker pipes are unavailable".to_string(),
                    })
                }
            };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("Failed to write worker data: {}", e);
            }
            // Closing stdin marks the end of the request
            drop(stdin);

            let stderr_task = tokio::spawn(async move {
                let mut output = String::new();
                let _ = BufReader::new(stderr).read_to_string(&mut output).await;
                output
            });

            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let event = match decode_line(&line) {
                            Ok(message) => WorkerEvent::Message(message),
                            Err(error) => WorkerEvent::Error(error),
                        };
                        // Receiver gone means the supervisor has settled
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let error = SolutionError::protocol(format!("unreadable worker output: {}", e));
                        let _ = tx.send(WorkerEvent::Error(error)).await;
                        return;
                    }
                }
            }

            let stderr_output = stderr_task.await.unwrap_or_default();
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!("Failed to wait for worker: {}", e);
                    None
                }
            };

            match parse_failure(&stderr_output) {
                Some(failure) => {
                    let _ = tx.send(WorkerEvent::Error(failure.error)).await;
                }
                None if !stderr_output.trim().is_empty() => {
                    warn!("Worker stderr: {}", stderr_output.trim());
                }
                None => {}
            }
            let _ = tx.send(WorkerEvent::Exit(code)).await;
        });

        Ok(rx)
    }
}

/// Last parseable failure record on the worker's stderr
fn parse_failure(stderr: &str) -> Option<WorkerFailure> {
    stderr
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<WorkerFailure>(line.trim()).ok())
}
