//! Restic command construction.

use super::plan::{CommandPlan, CommandSpec, FailurePolicy};
use super::{require_destination, require_sources, sftp_target, sources, EXCLUDED_SYSTEM_PATHS};
use crate::error::{OrchestratorError, Result};
use crate::models::{BackupJob, DestinationType, RestoreJob};

const DEFAULT_S3_ENDPOINT: &str = "s3.amazonaws.com";

/// Backend URI plus the environment restic needs to reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    pub uri: String,
    pub env: Vec<(String, String)>,
}

fn required<'a>(value: &'a Option<String>, what: &str, dest: DestinationType) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OrchestratorError::config(format!("{dest} destination requires {what}")))
}

/// `bucket/prefix` → (`bucket`, `/prefix`).
fn split_bucket(path: &str) -> (&str, String) {
    let trimmed = path.trim().trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((bucket, rest)) => (bucket, format!("/{}", rest.trim_matches('/'))),
        None => (trimmed, "/".into()),
    }
}

pub fn repository(job: &BackupJob) -> Result<Repository> {
    require_destination(job)?;
    let dest = job.destination_type;
    let path = job.destination_path.trim();
    let mut env = Vec::new();

    let uri = match dest {
        DestinationType::S3 => {
            let endpoint = job
                .endpoint
                .as_deref()
                .map(|e| e.trim().trim_end_matches('/'))
                .filter(|e| !e.is_empty())
                .unwrap_or(DEFAULT_S3_ENDPOINT);
            env.push(("AWS_ACCESS_KEY_ID".into(), required(&job.access_key, "an access key", dest)?.to_string()));
            env.push(("AWS_SECRET_ACCESS_KEY".into(), required(&job.secret_key, "a secret key", dest)?.to_string()));
            if let Some(region) = job.region.as_deref().filter(|r| !r.is_empty()) {
                env.push(("AWS_DEFAULT_REGION".into(), region.to_string()));
            }
            format!("s3:{endpoint}/{}", path.trim_start_matches('/'))
        }
        DestinationType::B2 => {
            env.push(("B2_ACCOUNT_ID".into(), required(&job.access_key, "an account id", dest)?.to_string()));
            env.push(("B2_ACCOUNT_KEY".into(), required(&job.secret_key, "an account key", dest)?.to_string()));
            let (bucket, prefix) = split_bucket(path);
            format!("b2:{bucket}:{prefix}")
        }
        DestinationType::Azure => {
            env.push(("AZURE_ACCOUNT_NAME".into(), required(&job.access_key, "an account name", dest)?.to_string()));
            env.push(("AZURE_ACCOUNT_KEY".into(), required(&job.secret_key, "an account key", dest)?.to_string()));
            let (container, prefix) = split_bucket(path);
            format!("azure:{container}:{prefix}")
        }
        DestinationType::Sftp => format!("sftp:{}", sftp_target(job)?),
        DestinationType::Local | DestinationType::Nfs | DestinationType::Smb => path.to_string(),
    };

    Ok(Repository { uri, env })
}

fn validate_repository(job: &BackupJob) -> Result<Repository> {
    if job.repo_password.is_empty() {
        return Err(OrchestratorError::config("Restic requires a repository password"));
    }
    repository(job)
}

pub fn validate(job: &BackupJob) -> Result<()> {
    validate_repository(job)?;
    require_sources(job)
}

fn base_plan(job: &BackupJob, repo: &Repository) -> CommandPlan {
    let mut plan = CommandPlan::new().env("RESTIC_PASSWORD", job.repo_password.clone());
    for (k, v) in &repo.env {
        plan = plan.env(k, v.clone());
    }
    plan
}

fn restic(repo: &Repository, subcommand: &str) -> CommandSpec {
    CommandSpec::new("restic").args(["-r", &repo.uri, subcommand])
}

pub fn backup(job: &BackupJob) -> Result<CommandPlan> {
    require_sources(job)?;
    let repo = validate_repository(job)?;
    let tag = job.archive_prefix();

    let mut run = restic(&repo, "backup").args(["--one-file-system", "--tag", &tag]);
    for path in EXCLUDED_SYSTEM_PATHS {
        run = run.args(["--exclude", path]);
    }
    let mut plan = base_plan(job, &repo)
        // An existing repository makes init fail; that is the normal case.
        .run(restic(&repo, "init").policy(FailurePolicy::Ignore).quiet())
        .run(run.args(sources(job)));

    if let Some(retention) = job.retention {
        let mut forget = restic(&repo, "forget").args(["--prune", "--tag", &tag]);
        for (flag, value) in retention.keep_flags() {
            forget = forget.args([flag.to_string(), value.to_string()]);
        }
        plan = plan.run(forget);
    }
    Ok(plan)
}

pub fn list_snapshots(job: &BackupJob) -> Result<CommandPlan> {
    let repo = validate_repository(job)?;
    Ok(base_plan(job, &repo).run(restic(&repo, "snapshots").arg("--json")))
}

pub fn list_files(job: &BackupJob, snapshot_id: &str, path: Option<&str>) -> Result<CommandPlan> {
    let repo = validate_repository(job)?;
    let mut ls = restic(&repo, "ls").args(["--json", snapshot_id]);
    if let Some(p) = path.filter(|p| !p.trim().is_empty()) {
        ls = ls.arg(p);
    }
    Ok(base_plan(job, &repo).run(ls))
}

pub fn restore(restore: &RestoreJob) -> Result<CommandPlan> {
    let job = &restore.job;
    let repo = validate_repository(job)?;
    if restore.restore_path.trim().is_empty() {
        return Err(OrchestratorError::config("No restore path configured"));
    }
    if restore.snapshot_id.trim().is_empty() {
        return Err(OrchestratorError::config("No snapshot selected for restore"));
    }

    let mut run = restic(&repo, "restore").args([restore.snapshot_id.as_str(), "--target", "."]);
    for p in restore.paths.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        run = run.args(["--include", p]);
    }
    let run = run.policy(FailurePolicy::AllowWarnings(1));

    Ok(base_plan(job, &repo)
        .run(CommandSpec::new("mkdir").args(["-p", &restore.restore_path]))
        .cd(&restore.restore_path)
        .run(run))
}
