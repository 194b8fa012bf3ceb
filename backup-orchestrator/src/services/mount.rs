//! SSHFS mounts for destinations Borg can only reach as a filesystem.

use std::path::{Path, PathBuf};

use crate::builders::{sftp_target, CommandPlan, CommandSpec};
use crate::error::{OrchestratorError, Result};
use crate::executor::CommandExecutor;
use crate::models::{BackupJob, LogType};

const SSHFS_OPTIONS: &str =
    "reconnect,ServerAliveInterval=15,ServerAliveCountMax=3,StrictHostKeyChecking=accept-new";

/// Subdirectory of the mount point holding the Borg repository.
pub const BORG_REPO_DIR: &str = "borg-repo";

#[derive(Debug, Clone)]
pub struct MountManager {
    root: PathBuf,
}

impl MountManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `{root}/{jobId}`, with the job id reduced to path-safe characters.
    pub fn mount_point(&self, job_id: &str) -> String {
        let safe: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        let safe = if safe.is_empty() { "job".to_string() } else { safe };
        self.root.join(safe).to_string_lossy().into_owned()
    }

    pub async fn mount(&self, exec: &dyn CommandExecutor, job: &BackupJob) -> Result<String> {
        let target = sftp_target(job)?;
        let mount_point = self.mount_point(&job.job_id);

        let mut sshfs = CommandSpec::new("sshfs")
            .arg(target.to_string())
            .arg(&mount_point)
            .args(["-o", SSHFS_OPTIONS]);

        let mut plan = CommandPlan::new().run(CommandSpec::new("mkdir").args(["-p", &mount_point]));
        plan = match job.secret_key.as_deref().filter(|s| !s.is_empty()) {
            Some(password) => {
                exec.recorder().register_secret(password);
                sshfs = sshfs.args(["-o", "password_stdin"]);
                plan.env("SSHPASS", password).feed_env("SSHPASS", sshfs)
            }
            None => plan.run(sshfs),
        };

        exec.log(LogType::Info, &format!("Mounting {target} at {mount_point}"));
        let out = exec.exec_plan(&plan).await?;
        if !out.success() {
            return Err(OrchestratorError::Command {
                code: out.exit_code,
                message: format!("Failed to mount {target}: {}", out.failure_message()),
            });
        }
        tracing::info!(mount_point = %mount_point, "SSHFS mount ready");
        Ok(mount_point)
    }

    /// Best effort. Every step may fail; failures are traced, never returned.
    pub async fn unmount(&self, exec: &dyn CommandExecutor, mount_point: &str) {
        let fuse = cleanup_step(exec, CommandSpec::new("fusermount").args(["-u", mount_point])).await;
        if let Err(e) = fuse {
            tracing::debug!(error = %e, "fusermount failed, trying lazy unmount");
            if let Err(e) = cleanup_step(exec, CommandSpec::new("umount").args(["-l", mount_point])).await {
                tracing::debug!(error = %e, "lazy unmount failed");
            }
        }
        if let Err(e) = cleanup_step(exec, CommandSpec::new("rmdir").arg(mount_point)).await {
            tracing::debug!(error = %e, "mount point removal failed");
        }
    }
}

/// Repository location inside a mounted destination.
pub fn borg_repo_path(mount_point: &str) -> String {
    Path::new(mount_point).join(BORG_REPO_DIR).to_string_lossy().into_owned()
}

async fn cleanup_step(exec: &dyn CommandExecutor, spec: CommandSpec) -> Result<()> {
    let command = CommandPlan::new().run(spec.quiet()).to_shell();
    match exec.exec(&command).await {
        Ok(out) if out.success() => Ok(()),
        Ok(out) => Err(OrchestratorError::Cleanup(format!("{command}: exit code {}", out.exit_code))),
        Err(e) => Err(OrchestratorError::Cleanup(e.to_string())),
    }
}
