//! Entry points for one unit of work: backup, restore, listing, deployment.
//!
//! Each call resolves credentials, opens its own session, prepares the
//! destination, runs the built command and folds the outcome into a result
//! value carrying the full log trail. Nothing here returns `Err`; failures are
//! data.

use chrono::{DateTime, Utc};

use super::deployer::{enter_stage, Deployer, Stage};
use super::mount::{borg_repo_path, MountManager};
use crate::builders::{self, output, sftp_target, BackupOptions, CommandPlan};
use crate::config::OrchestratorConfig;
use crate::credentials::CredentialResolver;
use crate::error::{OrchestratorError, Result};
use crate::executor::{CommandExecutor, ExecOutput, LogRecorder, LogSink, SshExecutor};
use crate::models::{
    BackupJob, BackupResult, ConnectionDescriptor, DeploymentResult, DestinationType, FileEntry,
    Listing, LogType, RestoreJob, Snapshot, SystemTarget, Tool,
};
use crate::ws::LogBroadcaster;

pub struct Operations {
    config: OrchestratorConfig,
    resolver: CredentialResolver,
    mounts: MountManager,
    broadcaster: LogBroadcaster,
}

/// Borg cannot speak SFTP to a plain server, so those destinations get mounted.
fn needs_mount(job: &BackupJob) -> bool {
    job.tool == Tool::Borg && job.destination_type == DestinationType::Sftp
}

fn mounted_view(job: &BackupJob, mount_point: &str) -> BackupJob {
    BackupJob {
        destination_type: DestinationType::Local,
        destination_path: borg_repo_path(mount_point),
        ..job.clone()
    }
}

impl Operations {
    pub fn new(config: OrchestratorConfig, broadcaster: LogBroadcaster) -> Self {
        Self {
            resolver: CredentialResolver::new(config.encryption_secret.clone()),
            mounts: MountManager::new(config.mount_root.clone()),
            config,
            broadcaster,
        }
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        &self.broadcaster
    }

    async fn descriptor(&self, target: &SystemTarget) -> Result<ConnectionDescriptor> {
        if target.local_mode {
            return Ok(ConnectionDescriptor::local());
        }
        let resolver = self.resolver.clone();
        let overrides = target.overrides.clone();
        let stored = target.stored_key.clone();
        // Stored keys go through Argon2id.
        let credentials =
            tokio::task::spawn_blocking(move || resolver.resolve(&overrides, stored.as_ref())).await??;
        Ok(ConnectionDescriptor::remote(&target.host, target.port, &target.username, credentials))
    }

    async fn connect(
        &self,
        target: &SystemTarget,
        tool: Option<Tool>,
        recorder: &LogRecorder,
    ) -> Result<SshExecutor> {
        let descriptor = self.descriptor(target).await?;
        let mut exec = SshExecutor::new(recorder.clone(), self.config.connect_timeout);
        exec.set_tool(tool);
        if !exec.connect(&descriptor).await {
            return Err(OrchestratorError::connection(format!("Could not connect to {}", target.host)));
        }
        Ok(exec)
    }

    /// The job as the command builder will see it once any mount is in place.
    fn destination_view(&self, job: &BackupJob) -> Result<BackupJob> {
        if needs_mount(job) {
            sftp_target(job)?;
            return Ok(mounted_view(job, &self.mounts.mount_point(&job.job_id)));
        }
        Ok(job.clone())
    }

    /// Mount if needed, run the built command, always release the mount.
    async fn run_against_destination<F>(
        &self,
        exec: &dyn CommandExecutor,
        job: &BackupJob,
        captured: bool,
        build: &F,
    ) -> Result<ExecOutput>
    where
        F: Fn(&BackupJob) -> Result<CommandPlan> + Sync,
    {
        let mount_point = if needs_mount(job) {
            match self.mounts.mount(exec, job).await {
                Ok(mp) => Some(mp),
                Err(e) => {
                    self.mounts.unmount(exec, &self.mounts.mount_point(&job.job_id)).await;
                    return Err(e);
                }
            }
        } else {
            None
        };
        let view = match &mount_point {
            Some(mp) => mounted_view(job, mp),
            None => job.clone(),
        };

        let outcome = match build(&view) {
            Ok(plan) => {
                let command = plan.to_shell();
                if captured {
                    exec.exec_captured(&command).await
                } else {
                    exec.exec(&command).await
                }
            }
            Err(e) => Err(e),
        };

        if let Some(mp) = mount_point {
            self.mounts.unmount(exec, &mp).await;
        }
        outcome
    }

    /// Validate, connect, run, disconnect. Validation happens before any connection.
    async fn run_job<F>(
        &self,
        target: &SystemTarget,
        job: &BackupJob,
        recorder: &LogRecorder,
        captured: bool,
        build: &F,
    ) -> Result<ExecOutput>
    where
        F: Fn(&BackupJob) -> Result<CommandPlan> + Sync,
    {
        build(&self.destination_view(job)?)?;
        let mut exec = self.connect(target, Some(job.tool), recorder).await?;
        let outcome = self.run_against_destination(&exec, job, captured, build).await;
        exec.disconnect().await;
        outcome
    }

    // ── Backup / restore ──

    pub async fn backup(&self, target: &SystemTarget, job: &BackupJob) -> BackupResult {
        let relay = self.broadcaster.relay(&job.job_id);
        let result = self.backup_with_sink(target, job, Some(relay.sink())).await;
        relay.finish(result.success).await;
        result
    }

    pub async fn backup_with_sink(
        &self,
        target: &SystemTarget,
        job: &BackupJob,
        sink: Option<LogSink>,
    ) -> BackupResult {
        let started = Utc::now();
        let recorder = LogRecorder::new(sink);
        recorder.register_secrets(job.secrets());
        recorder.log(
            LogType::Info,
            &format!("Starting {} backup '{}' to {}", job.tool, job.job_name, job.destination_type),
        );
        tracing::info!(job_id = %job.job_id, tool = %job.tool, "Backup started");

        let mode = self.config.borg_repo_mode;
        let build = move |j: &BackupJob| builders::backup_plan(j, &BackupOptions::now(mode));
        let outcome = self.run_job(target, job, &recorder, false, &build).await;

        let result = run_result(job.tool, "Backup", started, &recorder, outcome);
        tracing::info!(job_id = %job.job_id, success = result.success, "Backup finished");
        recorder.close_sink();
        result
    }

    pub async fn restore(&self, target: &SystemTarget, restore: &RestoreJob) -> BackupResult {
        let relay = self.broadcaster.relay(&restore.job.job_id);
        let result = self.restore_with_sink(target, restore, Some(relay.sink())).await;
        relay.finish(result.success).await;
        result
    }

    pub async fn restore_with_sink(
        &self,
        target: &SystemTarget,
        restore: &RestoreJob,
        sink: Option<LogSink>,
    ) -> BackupResult {
        let started = Utc::now();
        let job = &restore.job;
        let recorder = LogRecorder::new(sink);
        recorder.register_secrets(job.secrets());
        recorder.log(
            LogType::Info,
            &format!("Restoring snapshot {} to {}", restore.snapshot_id, restore.restore_path),
        );
        tracing::info!(job_id = %job.job_id, snapshot = %restore.snapshot_id, "Restore started");

        let build = |j: &BackupJob| {
            builders::restore_plan(&RestoreJob { job: j.clone(), ..restore.clone() })
        };
        let outcome = self.run_job(target, job, &recorder, false, &build).await;

        let result = run_result(job.tool, "Restore", started, &recorder, outcome);
        tracing::info!(job_id = %job.job_id, success = result.success, "Restore finished");
        recorder.close_sink();
        result
    }

    // ── Listings ──

    pub async fn list_snapshots(&self, target: &SystemTarget, job: &BackupJob) -> Listing<Snapshot> {
        self.list_snapshots_with_sink(target, job, None).await
    }

    pub async fn list_snapshots_with_sink(
        &self,
        target: &SystemTarget,
        job: &BackupJob,
        sink: Option<LogSink>,
    ) -> Listing<Snapshot> {
        let recorder = LogRecorder::new(sink);
        recorder.register_secrets(job.secrets());
        let outcome = self
            .run_job(target, job, &recorder, true, &builders::snapshots_plan)
            .await
            .and_then(captured_stdout)
            .and_then(|stdout| output::parse_snapshots(job.tool, &stdout));
        let listing = listing_result(&recorder, outcome);
        recorder.close_sink();
        listing
    }

    pub async fn list_files(
        &self,
        target: &SystemTarget,
        job: &BackupJob,
        snapshot_id: &str,
        path: Option<&str>,
    ) -> Listing<FileEntry> {
        self.list_files_with_sink(target, job, snapshot_id, path, None).await
    }

    pub async fn list_files_with_sink(
        &self,
        target: &SystemTarget,
        job: &BackupJob,
        snapshot_id: &str,
        path: Option<&str>,
        sink: Option<LogSink>,
    ) -> Listing<FileEntry> {
        let recorder = LogRecorder::new(sink);
        recorder.register_secrets(job.secrets());
        let build = |j: &BackupJob| builders::files_plan(j, snapshot_id, path);
        let outcome = self
            .run_job(target, job, &recorder, true, &build)
            .await
            .and_then(captured_stdout)
            .and_then(|stdout| output::parse_files(job.tool, &stdout));
        let listing = listing_result(&recorder, outcome);
        recorder.close_sink();
        listing
    }

    // ── Deployment ──

    pub async fn deploy(&self, stream_id: &str, target: &SystemTarget, tools: &[Tool]) -> DeploymentResult {
        let relay = self.broadcaster.relay(stream_id);
        let result = self.deploy_with_sink(target, tools, Some(relay.sink())).await;
        relay.finish(result.success).await;
        result
    }

    pub async fn deploy_with_sink(
        &self,
        target: &SystemTarget,
        tools: &[Tool],
        sink: Option<LogSink>,
    ) -> DeploymentResult {
        let recorder = LogRecorder::new(sink);
        let result = self.deploy_inner(target, tools, &recorder).await;
        tracing::info!(host = %target.host, success = result.success, "Deployment finished");
        recorder.close_sink();
        result
    }

    async fn deploy_inner(
        &self,
        target: &SystemTarget,
        tools: &[Tool],
        recorder: &LogRecorder,
    ) -> DeploymentResult {
        if tools.is_empty() {
            return deployment_failure(recorder, OrchestratorError::config("No tools selected for deployment"));
        }

        enter_stage(recorder, Stage::Credentials);
        let descriptor = match self.descriptor(target).await {
            Ok(d) => d,
            Err(e) => return deployment_failure(recorder, e),
        };

        enter_stage(recorder, Stage::Connecting);
        let mut exec = SshExecutor::new(recorder.clone(), self.config.connect_timeout);
        if !exec.connect(&descriptor).await {
            let e = OrchestratorError::connection(format!("Could not connect to {}", target.host));
            return deployment_failure(recorder, e);
        }

        let result = Deployer::prepare(&exec, &self.config.restic_version)
            .await
            .deploy(tools)
            .await;
        exec.disconnect().await;
        DeploymentResult { logs: recorder.entries(), ..result }
    }
}

fn captured_stdout(out: ExecOutput) -> Result<String> {
    if out.success() {
        Ok(out.stdout)
    } else {
        Err(OrchestratorError::Command { code: out.exit_code, message: out.failure_message() })
    }
}

/// Fold a command outcome into a result. Only the exit code decides success.
pub(crate) fn run_result(
    tool: Tool,
    action: &str,
    started: DateTime<Utc>,
    recorder: &LogRecorder,
    outcome: Result<ExecOutput>,
) -> BackupResult {
    let (success, stats) = match outcome {
        Ok(out) => {
            // borg writes its --stats summary to stderr.
            let stats = output::parse_stats(tool, &format!("{}\n{}", out.stdout, out.stderr));
            if out.success() {
                recorder.log(LogType::Success, &format!("{action} completed successfully"));
                (true, stats)
            } else {
                recorder.log(
                    LogType::Error,
                    &format!("{action} failed (exit code {}): {}", out.exit_code, out.failure_message()),
                );
                (false, stats)
            }
        }
        Err(e) => {
            recorder.log(LogType::Error, &format!("{action} failed: {e}"));
            (false, output::RunStats::default())
        }
    };

    if let (Some(bytes), Some(files)) = (stats.bytes, stats.files) {
        recorder.log(LogType::Stats, &format!("{files} files, {bytes} bytes processed"));
    }

    BackupResult {
        success,
        start_time: started,
        end_time: Utc::now(),
        bytes_processed: stats.bytes,
        files_processed: stats.files,
        errors: if success { Vec::new() } else { recorder.errors() },
        logs: recorder.entries(),
    }
}

fn listing_result<T>(recorder: &LogRecorder, outcome: Result<Vec<T>>) -> Listing<T> {
    match outcome {
        Ok(items) => Listing { success: true, items, logs: recorder.entries(), error: None },
        Err(e) => {
            let entry = recorder.log(LogType::Error, &e.to_string());
            Listing { success: false, items: Vec::new(), logs: recorder.entries(), error: Some(entry.message) }
        }
    }
}

fn deployment_failure(recorder: &LogRecorder, error: OrchestratorError) -> DeploymentResult {
    let entry = recorder.log(LogType::Error, &error.to_string());
    enter_stage(recorder, Stage::Done { success: false });
    DeploymentResult {
        success: false,
        installed_tools: Vec::new(),
        logs: recorder.entries(),
        error: Some(entry.message),
    }
}
