//! Command execution against a local shell or a remote SSH session.
//!
//! [`CommandExecutor`] is the seam the mount manager, deployer and operations
//! run through. [`SshExecutor`] is the production implementation; tests use
//! a scripted double.

pub mod classify;
pub mod lines;
mod local;
pub mod recorder;
mod remote;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::builders::CommandPlan;
use crate::error::{OrchestratorError, Result};
use crate::models::{ConnectionDescriptor, LogType, Tool};

pub use recorder::{LogRecorder, LogSink};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best-effort reason for a failed command: the last stderr line, or the exit code.
    pub fn failure_message(&self) -> String {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("exited with code {}", self.exit_code))
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command, streaming both outputs into the log trail.
    async fn exec(&self, command: &str) -> Result<ExecOutput>;

    /// Run a command whose stdout is machine-readable; stdout is not logged.
    async fn exec_captured(&self, command: &str) -> Result<ExecOutput>;

    fn recorder(&self) -> &LogRecorder;

    fn log(&self, log_type: LogType, message: &str) {
        self.recorder().log(log_type, message);
    }

    async fn exec_plan(&self, plan: &CommandPlan) -> Result<ExecOutput> {
        self.exec(&plan.to_shell()).await
    }
}

/// Routes output lines into the recorder.
#[derive(Clone)]
pub(crate) struct StreamLogger {
    recorder: LogRecorder,
    tool: Option<Tool>,
    log_stdout: bool,
}

impl StreamLogger {
    pub(crate) fn stdout_line(&self, line: &str) {
        if self.log_stdout {
            self.recorder.log(classify::classify(self.tool, line), line);
        }
    }

    /// stderr is always an error entry; the exit code alone decides success.
    pub(crate) fn stderr_line(&self, line: &str) {
        self.recorder.log(LogType::Error, line);
    }
}

#[derive(Clone)]
enum Transport {
    Local,
    Remote(Arc<Mutex<ssh2::Session>>),
}

pub struct SshExecutor {
    recorder: LogRecorder,
    connect_timeout: Duration,
    tool: Option<Tool>,
    transport: Option<Transport>,
}

impl SshExecutor {
    pub fn new(recorder: LogRecorder, connect_timeout: Duration) -> Self {
        Self { recorder, connect_timeout, tool: None, transport: None }
    }

    /// Selects the output classification table for subsequent commands.
    pub fn set_tool(&mut self, tool: Option<Tool>) {
        self.tool = tool;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Never fails: problems are logged and reported as `false`.
    pub async fn connect(&mut self, descriptor: &ConnectionDescriptor) -> bool {
        self.recorder.register_secrets(descriptor.secrets());

        if descriptor.local_mode {
            self.transport = Some(Transport::Local);
            self.recorder.log(LogType::Info, "Running commands on the local machine");
            return true;
        }

        self.recorder.log(
            LogType::Ssh,
            &format!("Connecting to {}@{}:{}", descriptor.username, descriptor.host, descriptor.port),
        );
        let d = descriptor.clone();
        let timeout = self.connect_timeout;
        let opened = tokio::task::spawn_blocking(move || remote::open_session(&d, timeout)).await;

        match opened {
            Ok(Ok(session)) => {
                self.transport = Some(Transport::Remote(Arc::new(Mutex::new(session))));
                self.recorder.log(LogType::Ssh, &format!("Connected to {}", descriptor.host));
                tracing::info!(host = %descriptor.host, port = descriptor.port, "SSH session established");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(host = %descriptor.host, error = %e, "SSH connect failed");
                self.recorder.log(LogType::Error, &format!("Failed to connect to {}: {e}", descriptor.host));
                false
            }
            Err(e) => {
                tracing::error!(host = %descriptor.host, error = %e, "SSH connect task panicked");
                self.recorder.log(LogType::Error, &format!("Failed to connect to {}", descriptor.host));
                false
            }
        }
    }

    /// Idempotent.
    pub async fn disconnect(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        if let Transport::Remote(session) = transport {
            let closed = tokio::task::spawn_blocking(move || {
                let session = session.lock().unwrap_or_else(PoisonError::into_inner);
                session.disconnect(None, "closing", None)
            })
            .await;
            if let Ok(Err(e)) = closed {
                tracing::debug!(error = %e, "SSH disconnect reported an error");
            }
        }
        self.recorder.log(LogType::Ssh, "Disconnected");
    }

    async fn run(&self, command: &str, log_stdout: bool) -> Result<ExecOutput> {
        let transport = self
            .transport
            .clone()
            .ok_or_else(|| OrchestratorError::connection("Not connected"))?;

        self.recorder.log(LogType::Cmd, command);
        let out = StreamLogger { recorder: self.recorder.clone(), tool: self.tool, log_stdout };

        let output = match transport {
            Transport::Local => local::run(command, &out).await?,
            Transport::Remote(session) => {
                let command = command.to_string();
                tokio::task::spawn_blocking(move || {
                    let session = session.lock().unwrap_or_else(PoisonError::into_inner);
                    remote::run(&session, &command, &out)
                })
                .await??
            }
        };

        tracing::debug!(exit_code = output.exit_code, "command finished");
        Ok(output)
    }
}

#[async_trait]
impl CommandExecutor for SshExecutor {
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        self.run(command, true).await
    }

    async fn exec_captured(&self, command: &str) -> Result<ExecOutput> {
        self.run(command, false).await
    }

    fn recorder(&self) -> &LogRecorder {
        &self.recorder
    }
}
