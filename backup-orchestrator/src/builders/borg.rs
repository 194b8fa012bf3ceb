//! Borg command construction.

use std::path::Path;

use super::plan::{CommandPlan, CommandSpec, FailurePolicy};
use super::{require_destination, require_sources, sources, BackupOptions, EXCLUDED_SYSTEM_PATHS};
use crate::config::BorgRepoMode;
use crate::error::{OrchestratorError, Result};
use crate::models::{BackupJob, DestinationType, RestoreJob};

const ENCRYPTION_MODE: &str = "repokey-blake2";
const ARCHIVE_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Checks shared by every Borg command that touches a repository.
fn validate_repository(job: &BackupJob) -> Result<()> {
    if job.destination_type.is_object_storage() {
        return Err(OrchestratorError::config(format!(
            "Borg cannot use {} object storage; use restic or a filesystem destination",
            job.destination_type
        )));
    }
    if job.repo_password.is_empty() {
        return Err(OrchestratorError::config("Borg requires a repository password"));
    }
    require_destination(job)?;
    // The mount step hands the builder a local view of the repository.
    if job.destination_type == DestinationType::Sftp {
        return Err(OrchestratorError::config(
            "Borg SFTP destinations must be mounted before building commands",
        ));
    }
    Ok(())
}

pub fn validate(job: &BackupJob) -> Result<()> {
    validate_repository(job)?;
    require_sources(job)?;
    let repo = repo_path(job);
    if repo == "/" || EXCLUDED_SYSTEM_PATHS.contains(&repo.as_str()) {
        return Err(OrchestratorError::config(format!("Refusing to use {repo} as a Borg repository")));
    }
    // Reinitializing deletes the repository directory first.
    if let Some(source) = sources(job).find(|s| Path::new(s.trim_end_matches('/')).starts_with(&repo)) {
        return Err(OrchestratorError::config(format!(
            "Borg repository {repo} would contain source path {source}"
        )));
    }
    Ok(())
}

fn repo_path(job: &BackupJob) -> String {
    let trimmed = job.destination_path.trim().trim_end_matches('/');
    if trimmed.is_empty() { "/".into() } else { trimmed.to_string() }
}

fn base_plan(job: &BackupJob) -> CommandPlan {
    CommandPlan::new()
        .env("BORG_PASSPHRASE", job.repo_password.clone())
        .env("BORG_NEW_PASSPHRASE", job.repo_password.clone())
        .env("BORG_RELOCATED_REPO_ACCESS_IS_OK", "yes")
}

fn borg(subcommand: &str) -> CommandSpec {
    CommandSpec::new("borg").arg(subcommand)
}

pub fn backup(job: &BackupJob, opts: &BackupOptions) -> Result<CommandPlan> {
    validate(job)?;
    let repo = repo_path(job);
    let parent = Path::new(&repo)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".into());

    let init = borg("init").arg(format!("--encryption={ENCRYPTION_MODE}")).arg(&repo);
    let mut plan = base_plan(job);
    plan = match opts.borg_repo_mode {
        BorgRepoMode::Reinitialize => plan
            .run(CommandSpec::new("rm").args(["-rf", &repo]))
            .run(CommandSpec::new("mkdir").args(["-p", &parent]))
            .run(init),
        BorgRepoMode::InitIfMissing => plan
            .run(CommandSpec::new("mkdir").args(["-p", &parent]))
            .unless(borg("info").arg(&repo), init),
    };

    let prefix = job.archive_prefix();
    let archive = format!("{repo}::{prefix}-{}", opts.timestamp.format(ARCHIVE_TIME_FORMAT));
    let mut create = borg("create").args(["--stats", "--compression", "lz4"]);
    for path in EXCLUDED_SYSTEM_PATHS {
        create = create.args(["--exclude", path]);
    }
    create = create.args(["--exclude", &repo]).arg(archive).args(sources(job));
    plan = plan.run(create);

    if let Some(retention) = job.retention {
        let mut prune = borg("prune").args(["--glob-archives".to_string(), format!("{prefix}-*")]);
        for (flag, value) in retention.keep_flags() {
            prune = prune.args([flag.to_string(), value.to_string()]);
        }
        plan = plan.run(prune.arg(&repo));
    }

    Ok(plan)
}

pub fn list_archives(job: &BackupJob) -> Result<CommandPlan> {
    validate_repository(job)?;
    Ok(base_plan(job).run(borg("list").arg("--json").arg(repo_path(job))))
}

pub fn list_files(job: &BackupJob, archive: &str, path: Option<&str>) -> Result<CommandPlan> {
    validate_repository(job)?;
    let mut list = borg("list").arg("--json-lines").arg(format!("{}::{archive}", repo_path(job)));
    if let Some(p) = path.map(|p| p.trim_start_matches('/')).filter(|p| !p.is_empty()) {
        list = list.arg(p);
    }
    Ok(base_plan(job).run(list))
}

pub fn restore(restore: &RestoreJob) -> Result<CommandPlan> {
    let job = &restore.job;
    validate_repository(job)?;
    if restore.restore_path.trim().is_empty() {
        return Err(OrchestratorError::config("No restore path configured"));
    }
    if restore.snapshot_id.trim().is_empty() {
        return Err(OrchestratorError::config("No archive selected for restore"));
    }

    // Borg archives store paths without the leading slash.
    let paths = restore
        .paths
        .iter()
        .map(|p| p.trim().trim_start_matches('/'))
        .filter(|p| !p.is_empty());
    let extract = borg("extract")
        .arg(format!("{}::{}", repo_path(job), restore.snapshot_id))
        .args(paths)
        .policy(FailurePolicy::AllowWarnings(1));

    Ok(base_plan(job)
        .run(CommandSpec::new("mkdir").args(["-p", &restore.restore_path]))
        .cd(&restore.restore_path)
        .run(extract))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::fixtures::{job, retention};
    use crate::models::Tool;
    use chrono::TimeZone;

    fn opts(mode: BorgRepoMode) -> BackupOptions {
        BackupOptions {
            borg_repo_mode: mode,
            timestamp: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 2, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_scenario_reinit_create_prune() {
        let mut j = job(Tool::Borg, DestinationType::Local, "/backups/repo1");
        j.retention = Some(retention());
        let cmd = backup(&j, &opts(BorgRepoMode::Reinitialize)).unwrap().to_shell();

        assert!(cmd.contains("borg init"));
        assert!(cmd.contains("--encryption=repokey-blake2"));
        assert!(cmd.contains("borg create"));
        assert!(cmd.contains("--keep-hourly 0"));
        assert!(cmd.contains("--keep-daily 7"));
        assert!(cmd.contains("--keep-weekly 4"));
        assert!(cmd.contains("--keep-monthly 6"));
        assert!(cmd.contains("--keep-yearly 1"));
        assert!(cmd.contains("rm -rf /backups/repo1 && mkdir -p /backups && borg init"));
        assert!(cmd.contains("/backups/repo1::nightly-2024-05-01T02-30-00 /home"));
        assert!(cmd.contains("--exclude /backups/repo1"));
        for p in EXCLUDED_SYSTEM_PATHS {
            assert!(cmd.contains(&format!("--exclude {p}")));
        }
        assert!(cmd.contains("--glob-archives 'nightly-*'"));
    }

    #[test]
    fn test_no_prune_without_retention() {
        let j = job(Tool::Borg, DestinationType::Local, "/backups/repo1");
        let cmd = backup(&j, &opts(BorgRepoMode::Reinitialize)).unwrap().to_shell();
        assert!(!cmd.contains("borg prune"));
    }

    #[test]
    fn test_init_if_missing_keeps_repository() {
        let j = job(Tool::Borg, DestinationType::Local, "/backups/repo1");
        let cmd = backup(&j, &opts(BorgRepoMode::InitIfMissing)).unwrap().to_shell();
        assert!(!cmd.contains("rm -rf"));
        assert!(cmd.contains("(borg info /backups/repo1 >/dev/null 2>&1 || borg init --encryption=repokey-blake2 /backups/repo1)"));
    }

    #[test]
    fn test_empty_password_rejected() {
        let mut j = job(Tool::Borg, DestinationType::Local, "/backups/repo1");
        j.repo_password.clear();
        let err = backup(&j, &opts(BorgRepoMode::Reinitialize)).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[test]
    fn test_s3_rejected() {
        let j = job(Tool::Borg, DestinationType::S3, "bucket/repo");
        let err = backup(&j, &opts(BorgRepoMode::Reinitialize)).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
        assert!(list_archives(&j).is_err());
    }

    #[test]
    fn test_system_paths_refused_as_repository() {
        for path in ["/", "/proc", "/dev/"] {
            let j = job(Tool::Borg, DestinationType::Local, path);
            assert!(validate(&j).is_err(), "{path}");
        }
    }

    #[test]
    fn test_unmounted_sftp_rejected() {
        let j = job(Tool::Borg, DestinationType::Sftp, "backup@nas:/srv/borg");
        assert!(validate(&j).is_err());

        let mut j = job(Tool::Borg, DestinationType::Sftp, "/srv/borg");
        j.endpoint = Some("nas.lan".into());
        let err = backup(&j, &opts(BorgRepoMode::Reinitialize)).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
        assert!(list_archives(&j).is_err());
    }

    #[test]
    fn test_repository_over_a_source_path_rejected() {
        for repo in ["/home", "/home/", "/"] {
            let j = job(Tool::Borg, DestinationType::Local, repo);
            assert!(validate(&j).is_err(), "{repo}");
        }
        let mut j = job(Tool::Borg, DestinationType::Local, "/srv");
        j.source_paths = vec!["/etc".into(), "/srv/www/".into()];
        let err = backup(&j, &opts(BorgRepoMode::Reinitialize)).unwrap_err();
        assert!(err.to_string().contains("/srv/www"));

        let j = job(Tool::Borg, DestinationType::Local, "/home-backups/repo");
        assert!(validate(&j).is_ok());
    }

    #[test]
    fn test_passphrase_travels_in_env_only() {
        let j = job(Tool::Borg, DestinationType::Local, "/backups/repo1");
        let plan = backup(&j, &opts(BorgRepoMode::Reinitialize)).unwrap();
        assert!(plan.programs().all(|s| !s.args.iter().any(|a| a.contains("secret123"))));
        assert!(plan.env.iter().any(|(k, v)| k == "BORG_PASSPHRASE" && v == "secret123"));
    }

    #[test]
    fn test_restore_full_and_subset() {
        let j = job(Tool::Borg, DestinationType::Local, "/backups/repo1");
        let full = restore(&RestoreJob {
            job: j.clone(),
            snapshot_id: "nightly-2024".into(),
            restore_path: "/tmp/restore".into(),
            paths: vec![],
        })
        .unwrap()
        .to_shell();
        assert!(full.ends_with(
            "mkdir -p /tmp/restore && cd /tmp/restore && (borg extract /backups/repo1::nightly-2024 || [ $? -le 1 ])"
        ));

        let subset = restore(&RestoreJob {
            job: j,
            snapshot_id: "nightly-2024".into(),
            restore_path: "/tmp/restore".into(),
            paths: vec!["/home/alice".into(), "etc/hosts".into()],
        })
        .unwrap()
        .to_shell();
        assert!(subset.contains("borg extract /backups/repo1::nightly-2024 home/alice etc/hosts"));
    }

    #[test]
    fn test_list_commands_emit_json() {
        let j = job(Tool::Borg, DestinationType::Local, "/backups/repo1");
        assert!(list_archives(&j).unwrap().to_shell().ends_with("borg list --json /backups/repo1"));
        let files = list_files(&j, "nightly-1", Some("/home")).unwrap().to_shell();
        assert!(files.ends_with("borg list --json-lines /backups/repo1::nightly-1 home"));
    }
}
