//! Per-tool command construction.
//!
//! Every function here is pure: it maps a job description to a
//! [`CommandPlan`] or fails with a configuration error before anything runs.

pub mod borg;
pub mod output;
pub mod plan;
pub mod restic;
pub mod rsync;

use chrono::{DateTime, Utc};
use std::fmt;

use crate::config::BorgRepoMode;
use crate::error::{OrchestratorError, Result};
use crate::models::{BackupJob, RestoreJob, Tool};

pub use plan::{CommandPlan, CommandSpec, FailurePolicy, Step};

/// Pseudo and transient filesystems never worth backing up.
pub const EXCLUDED_SYSTEM_PATHS: [&str; 6] = ["/proc", "/sys", "/dev", "/run", "/mnt", "/media"];

#[derive(Debug, Clone, Copy)]
pub struct BackupOptions {
    pub borg_repo_mode: BorgRepoMode,
    pub timestamp: DateTime<Utc>,
}

impl BackupOptions {
    pub fn now(borg_repo_mode: BorgRepoMode) -> Self {
        Self { borg_repo_mode, timestamp: Utc::now() }
    }
}

/// Static checks that must pass before any remote side effect.
pub fn validate(job: &BackupJob) -> Result<()> {
    match job.tool {
        Tool::Borg => borg::validate(job),
        Tool::Restic => restic::validate(job),
        Tool::Rsync => rsync::validate(job),
    }
}

pub fn backup_plan(job: &BackupJob, opts: &BackupOptions) -> Result<CommandPlan> {
    match job.tool {
        Tool::Borg => borg::backup(job, opts),
        Tool::Restic => restic::backup(job),
        Tool::Rsync => rsync::backup(job),
    }
}

pub fn snapshots_plan(job: &BackupJob) -> Result<CommandPlan> {
    match job.tool {
        Tool::Borg => borg::list_archives(job),
        Tool::Restic => restic::list_snapshots(job),
        Tool::Rsync => Err(no_snapshots()),
    }
}

pub fn files_plan(job: &BackupJob, snapshot_id: &str, path: Option<&str>) -> Result<CommandPlan> {
    match job.tool {
        Tool::Borg => borg::list_files(job, snapshot_id, path),
        Tool::Restic => restic::list_files(job, snapshot_id, path),
        Tool::Rsync => Err(no_snapshots()),
    }
}

pub fn restore_plan(restore: &RestoreJob) -> Result<CommandPlan> {
    match restore.job.tool {
        Tool::Borg => borg::restore(restore),
        Tool::Restic => restic::restore(restore),
        Tool::Rsync => Err(no_snapshots()),
    }
}

fn no_snapshots() -> OrchestratorError {
    OrchestratorError::config("rsync has no snapshots to list or restore")
}

pub(crate) fn require_sources(job: &BackupJob) -> Result<()> {
    if job.source_paths.iter().all(|p| p.trim().is_empty()) {
        return Err(OrchestratorError::config("No source paths configured"));
    }
    Ok(())
}

pub(crate) fn require_destination(job: &BackupJob) -> Result<()> {
    if job.destination_path.trim().is_empty() {
        return Err(OrchestratorError::config("No destination path configured"));
    }
    Ok(())
}

pub(crate) fn sources(job: &BackupJob) -> impl Iterator<Item = &str> {
    job.source_paths.iter().map(|p| p.trim()).filter(|p| !p.is_empty())
}

// ── SFTP targets ──

/// `[user@]host:path` on an SFTP-reachable server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpTarget {
    pub user: Option<String>,
    pub host: String,
    pub path: String,
}

impl fmt::Display for SftpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(u) => write!(f, "{}@{}:{}", u, self.host, self.path),
            None => write!(f, "{}:{}", self.host, self.path),
        }
    }
}

/// Split `[user@]host:path`. Returns None for plain paths.
pub(crate) fn split_remote_path(value: &str) -> Option<(Option<String>, String, String)> {
    let colon = value.find(':')?;
    let (login, path) = (&value[..colon], &value[colon + 1..]);
    if login.is_empty() || login.contains('/') {
        return None;
    }
    let (user, host) = match login.split_once('@') {
        Some((u, h)) => (Some(u.to_string()), h.to_string()),
        None => (None, login.to_string()),
    };
    if host.is_empty() {
        return None;
    }
    Some((user.filter(|u| !u.is_empty()), host, path.to_string()))
}

pub fn sftp_target(job: &BackupJob) -> Result<SftpTarget> {
    let dest = job.destination_path.trim();
    if let Some((user, host, path)) = split_remote_path(dest) {
        return Ok(SftpTarget {
            user: user.or_else(|| job.access_key.clone().filter(|k| !k.is_empty())),
            host,
            path: if path.is_empty() { ".".into() } else { path },
        });
    }

    let endpoint = job
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| {
            OrchestratorError::config("SFTP destination needs user@host:path or an endpoint host")
        })?;
    let (user, host) = match endpoint.split_once('@') {
        Some((u, h)) => (Some(u.to_string()), h.to_string()),
        None => (job.access_key.clone().filter(|k| !k.is_empty()), endpoint.to_string()),
    };
    // Endpoints sometimes carry a port or scheme; the host part is all sshfs/rsync want.
    let host = host
        .trim_start_matches("sftp://")
        .trim_start_matches("ssh://")
        .split(':')
        .next()
        .unwrap_or_default()
        .trim_end_matches('/')
        .to_string();
    if host.is_empty() {
        return Err(OrchestratorError::config("SFTP endpoint has no host"));
    }
    require_destination(job)?;
    Ok(SftpTarget { user, host, path: dest.to_string() })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::models::{BackupJob, DestinationType, RetentionPolicy, Tool};

    pub fn job(tool: Tool, dest: DestinationType, path: &str) -> BackupJob {
        BackupJob {
            job_id: "job-42".into(),
            job_name: "nightly".into(),
            tool,
            source_paths: vec!["/home".into()],
            destination_type: dest,
            destination_path: path.into(),
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
            repo_password: "secret123".into(),
            retention: None,
            cron_schedule: None,
        }
    }

    pub fn retention() -> RetentionPolicy {
        RetentionPolicy { keep_hourly: 0, keep_daily: 7, keep_weekly: 4, keep_monthly: 6, keep_yearly: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::models::DestinationType;

    fn with_object_creds(mut job: BackupJob) -> BackupJob {
        job.endpoint = Some("s3.example.com".into());
        job.access_key = Some("AKIA123".into());
        job.secret_key = Some("s3cr3t-key".into());
        job
    }

    #[test]
    fn test_every_supported_pair_builds_with_destination_and_keep_flags() {
        let cases = [
            (Tool::Borg, DestinationType::Local, "/backups/repo1"),
            (Tool::Borg, DestinationType::Nfs, "/mnt/nfs/borg-nfs"),
            (Tool::Borg, DestinationType::Smb, "/mnt/share/borg-smb"),
            (Tool::Borg, DestinationType::Local, "/tmp/mounts/job-42/borg-repo"),
            (Tool::Restic, DestinationType::Local, "/backups/r-local"),
            (Tool::Restic, DestinationType::Nfs, "/mnt/nfs/r-nfs"),
            (Tool::Restic, DestinationType::Smb, "/mnt/share/r-smb"),
            (Tool::Restic, DestinationType::Sftp, "backup@nas:/srv/r-sftp"),
            (Tool::Restic, DestinationType::S3, "bucket/r-s3"),
            (Tool::Restic, DestinationType::B2, "bucket/r-b2"),
            (Tool::Restic, DestinationType::Azure, "container/r-azure"),
            (Tool::Rsync, DestinationType::Local, "/backups/mirror-local"),
            (Tool::Rsync, DestinationType::Nfs, "/mnt/nfs/mirror-nfs"),
            (Tool::Rsync, DestinationType::Sftp, "backup@nas:/srv/mirror-sftp"),
        ];
        for (tool, dest, path) in cases {
            let mut j = with_object_creds(job(tool, dest, path));
            j.retention = Some(retention());
            let cmd = backup_plan(&j, &BackupOptions::now(BorgRepoMode::Reinitialize))
                .unwrap_or_else(|e| panic!("{tool}/{dest}: {e}"))
                .to_shell();
            assert!(!cmd.is_empty());
            let bare_path = path.split(':').last().unwrap().split('/').last().unwrap();
            assert!(cmd.contains(bare_path), "{tool}/{dest}: {cmd}");
            if tool != Tool::Rsync {
                for (flag, value) in retention().keep_flags() {
                    assert!(cmd.contains(&format!("{flag} {value}")), "{tool}/{dest} missing {flag}: {cmd}");
                }
            }
        }
    }

    #[test]
    fn test_object_storage_rejected_for_borg_and_rsync() {
        for tool in [Tool::Borg, Tool::Rsync] {
            for dest in [DestinationType::S3, DestinationType::B2, DestinationType::Azure] {
                let j = with_object_creds(job(tool, dest, "bucket/x"));
                let err = validate(&j).unwrap_err();
                assert!(matches!(err, OrchestratorError::Configuration(_)), "{tool}/{dest}");
            }
        }
    }

    #[test]
    fn test_rsync_has_no_snapshots() {
        let j = job(Tool::Rsync, DestinationType::Local, "/m");
        assert!(snapshots_plan(&j).is_err());
        assert!(files_plan(&j, "x", None).is_err());
    }

    #[test]
    fn test_sftp_target_from_destination_path() {
        let j = job(Tool::Borg, DestinationType::Sftp, "backup@nas.lan:/srv/borg");
        assert_eq!(
            sftp_target(&j).unwrap(),
            SftpTarget { user: Some("backup".into()), host: "nas.lan".into(), path: "/srv/borg".into() }
        );
    }

    #[test]
    fn test_sftp_target_from_endpoint_fields() {
        let mut j = job(Tool::Borg, DestinationType::Sftp, "/srv/borg");
        j.endpoint = Some("nas.lan:22".into());
        j.access_key = Some("backup".into());
        let t = sftp_target(&j).unwrap();
        assert_eq!(t.to_string(), "backup@nas.lan:/srv/borg");

        j.endpoint = Some("ops@10.0.0.5".into());
        assert_eq!(sftp_target(&j).unwrap().to_string(), "ops@10.0.0.5:/srv/borg");
    }

    #[test]
    fn test_sftp_target_without_host_is_config_error() {
        let j = job(Tool::Borg, DestinationType::Sftp, "/srv/borg");
        assert!(matches!(sftp_target(&j), Err(OrchestratorError::Configuration(_))));
    }
}
