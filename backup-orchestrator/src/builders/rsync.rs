//! Rsync mirror command construction.

use super::plan::{CommandPlan, CommandSpec};
use super::{require_destination, require_sources, sftp_target, sources};
use crate::error::{OrchestratorError, Result};
use crate::models::{BackupJob, DestinationType};

const EXCLUDE_PATTERNS: [&str; 5] = [".cache/", "cache/", "tmp/", "*.tmp", "*.swp"];
const SSH_TRANSPORT: &str = "ssh -o StrictHostKeyChecking=accept-new";

pub fn validate(job: &BackupJob) -> Result<()> {
    if job.destination_type.is_object_storage() {
        return Err(OrchestratorError::config(format!(
            "rsync cannot write to {} object storage",
            job.destination_type
        )));
    }
    require_destination(job)?;
    require_sources(job)
}

/// Trailing slash so rsync treats the destination as a directory.
fn as_dir(path: &str) -> String {
    if path.ends_with('/') { path.to_string() } else { format!("{path}/") }
}

pub fn backup(job: &BackupJob) -> Result<CommandPlan> {
    validate(job)?;

    let mut rsync = CommandSpec::new("rsync").args([
        "-aH",
        "--numeric-ids",
        "--delete",
        "--relative",
        "--stats",
        "--info=progress2",
    ]);
    for pattern in EXCLUDE_PATTERNS {
        rsync = rsync.args(["--exclude", pattern]);
    }

    let plan = CommandPlan::new();
    if job.destination_type == DestinationType::Sftp {
        let mut target = sftp_target(job)?;
        target.path = as_dir(&target.path);
        rsync = rsync.args(["-e", SSH_TRANSPORT]).args(sources(job)).arg(target.to_string());
        return Ok(plan.run(rsync));
    }

    let dest = job.destination_path.trim();
    Ok(plan
        .run(CommandSpec::new("mkdir").args(["-p", dest]))
        .run(rsync.args(sources(job)).arg(as_dir(dest))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures::job;
    use crate::models::Tool;

    #[test]
    fn test_local_mirror() {
        let mut j = job(Tool::Rsync, DestinationType::Local, "/backups/mirror");
        j.source_paths = vec!["/home".into(), "/etc".into()];
        let cmd = backup(&j).unwrap().to_shell();
        assert!(cmd.starts_with("mkdir -p /backups/mirror && rsync -aH --numeric-ids --delete --relative --stats"));
        assert!(cmd.contains("--exclude '*.tmp'"));
        assert!(cmd.ends_with("/home /etc /backups/mirror/"));
    }

    #[test]
    fn test_sftp_mirror_uses_remote_target() {
        let j = job(Tool::Rsync, DestinationType::Sftp, "backup@nas:/srv/mirror");
        let cmd = backup(&j).unwrap().to_shell();
        assert!(!cmd.contains("mkdir"));
        assert!(cmd.contains("-e 'ssh -o StrictHostKeyChecking=accept-new'"));
        assert!(cmd.ends_with("/home backup@nas:/srv/mirror/"));
    }

    #[test]
    fn test_object_storage_rejected() {
        let j = job(Tool::Rsync, DestinationType::B2, "bucket");
        assert!(matches!(backup(&j), Err(OrchestratorError::Configuration(_))));
    }

    #[test]
    fn test_missing_sources_rejected() {
        let mut j = job(Tool::Rsync, DestinationType::Local, "/m");
        j.source_paths = vec!["  ".into()];
        assert!(validate(&j).is_err());
    }
}
