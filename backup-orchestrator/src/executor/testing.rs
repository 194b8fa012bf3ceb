//! Scripted executor for exercising services without a shell or SSH server.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommandExecutor, ExecOutput, LogRecorder};
use crate::error::Result;
use crate::models::LogType;

pub(crate) struct ScriptedExecutor {
    recorder: LogRecorder,
    /// First rule whose needle occurs in the command decides the output.
    rules: Vec<(String, ExecOutput)>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::with_recorder(LogRecorder::new(None))
    }

    pub fn with_recorder(recorder: LogRecorder) -> Self {
        Self { recorder, rules: Vec::new(), commands: Mutex::new(Vec::new()) }
    }

    pub fn on(mut self, needle: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        self.rules.push((
            needle.to_string(),
            ExecOutput { stdout: stdout.into(), stderr: stderr.into(), exit_code },
        ));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn respond(&self, command: &str, log_stdout: bool) -> ExecOutput {
        self.recorder.log(LogType::Cmd, command);
        if let Ok(mut c) = self.commands.lock() {
            c.push(command.to_string());
        }
        let out = self
            .rules
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default();
        if log_stdout {
            for line in out.stdout.lines().filter(|l| !l.trim().is_empty()) {
                self.recorder.log(LogType::Info, line);
            }
        }
        for line in out.stderr.lines().filter(|l| !l.trim().is_empty()) {
            self.recorder.log(LogType::Error, line);
        }
        out
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn exec(&self, command: &str) -> Result<ExecOutput> {
        Ok(self.respond(command, true))
    }

    async fn exec_captured(&self, command: &str) -> Result<ExecOutput> {
        Ok(self.respond(command, false))
    }

    fn recorder(&self) -> &LogRecorder {
        &self.recorder
    }
}
