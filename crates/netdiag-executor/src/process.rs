//! Child-process executor streaming command output.

use std::process::Stdio;

use async_trait::async_trait;
use command_group::AsyncCommandGroup;
use netdiag_core::traits::{ExecutorError, FrameSink};
use netdiag_core::{CommandRequest, Executor, InboundFrame};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::command::{CommandBuildError, CommandBuilder};
use crate::params::CommandParams;

/// Runs `ping` and `dig` as child processes.
///
/// Each stdout line becomes an output frame. A non-zero exit produces one
/// error frame carrying stderr (or the exit status when stderr is empty).
/// The process group is killed if the returned future is dropped.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    wrapper: Option<String>,
}

impl ProcessExecutor {
    /// Create an executor running the commands directly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command through a wrapper, e.g. `"timeout 60"`.
    #[must_use]
    pub fn with_wrapper(wrapper: impl Into<String>) -> Self {
        Self {
            wrapper: Some(wrapper.into()),
        }
    }
}

impl From<CommandBuildError> for ExecutorError {
    fn from(e: CommandBuildError) -> Self {
        match e {
            CommandBuildError::NotFound(program) => Self::ExecutableNotFound(program),
            other => Self::SpawnFailed(other.to_string()),
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, request: &CommandRequest, sink: FrameSink) -> Result<(), ExecutorError> {
        let params = CommandParams::from_request(request)
            .map_err(|e| ExecutorError::InvalidRequest(e.to_string()))?;

        let mut builder = CommandBuilder::for_params(&params);
        if let Some(wrapper) = &self.wrapper {
            let base = format!("{wrapper} {}", builder.base);
            builder = builder.override_base(base);
        }
        let parts = builder.build()?;
        if let Ok(shown) = parts.display() {
            tracing::info!(command = %shown, "Spawning");
        }
        let (executable, args) = parts.into_resolved()?;

        let mut child = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .group()
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?;

        let stdout = child
            .inner()
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::SpawnFailed("stdout not captured".to_string()))?;
        let stderr = child
            .inner()
            .stderr
            .take()
            .ok_or_else(|| ExecutorError::SpawnFailed("stderr not captured".to_string()))?;

        let forward_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if sink.send(InboundFrame::output(line)).is_err() {
                    break;
                }
            }
            Ok::<_, std::io::Error>(())
        };

        let collect_stderr = async {
            let mut buf = String::new();
            BufReader::new(stderr).read_to_string(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };

        let (forwarded, stderr_text) = tokio::join!(forward_stdout, collect_stderr);
        forwarded?;
        let stderr_text = stderr_text?;

        let status = child.wait().await?;
        tracing::debug!(%status, "Command exited");

        if !status.success() {
            let message = match stderr_text.trim() {
                "" => format!("{} exited with {status}", request.kind),
                text => text.to_string(),
            };
            let _ = sink.send(InboundFrame::error(message));
        }

        Ok(())
    }
}
