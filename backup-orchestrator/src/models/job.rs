use serde::{Deserialize, Serialize};
use std::fmt;

// ── Tool / destination ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Borg,
    Restic,
    Rsync,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Borg => "borg",
            Tool::Restic => "restic",
            Tool::Rsync => "rsync",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    Local,
    Nfs,
    Smb,
    Sftp,
    S3,
    B2,
    Azure,
}

impl DestinationType {
    /// Bucket/container style storage that cannot be addressed as a filesystem path.
    pub fn is_object_storage(&self) -> bool {
        matches!(self, DestinationType::S3 | DestinationType::B2 | DestinationType::Azure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::Local => "local",
            DestinationType::Nfs => "nfs",
            DestinationType::Smb => "smb",
            DestinationType::Sftp => "sftp",
            DestinationType::S3 => "s3",
            DestinationType::B2 => "b2",
            DestinationType::Azure => "azure",
        }
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Retention ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    #[serde(default)]
    pub keep_hourly: u32,
    #[serde(default)]
    pub keep_daily: u32,
    #[serde(default)]
    pub keep_weekly: u32,
    #[serde(default)]
    pub keep_monthly: u32,
    #[serde(default)]
    pub keep_yearly: u32,
}

impl RetentionPolicy {
    /// `--keep-*` flag/value pairs in a fixed order. Zero counts are kept.
    pub fn keep_flags(&self) -> [(&'static str, u32); 5] {
        [
            ("--keep-hourly", self.keep_hourly),
            ("--keep-daily", self.keep_daily),
            ("--keep-weekly", self.keep_weekly),
            ("--keep-monthly", self.keep_monthly),
            ("--keep-yearly", self.keep_yearly),
        ]
    }
}

// ── BackupJob ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupJob {
    pub job_id: String,
    pub job_name: String,
    pub tool: Tool,
    pub source_paths: Vec<String>,
    pub destination_type: DestinationType,
    pub destination_path: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub repo_password: String,
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
    /// Descriptive only. Nothing in the orchestrator schedules runs.
    #[serde(default)]
    pub cron_schedule: Option<String>,
}

impl BackupJob {
    /// Values that must never show up in a log line for this job.
    pub fn secrets(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.repo_password.is_empty() {
            out.push(self.repo_password.clone());
        }
        if let Some(ref s) = self.secret_key {
            if !s.is_empty() {
                out.push(s.clone());
            }
        }
        out
    }

    /// Archive-name-safe form of the job name.
    pub fn archive_prefix(&self) -> String {
        let cleaned: String = self
            .job_name
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
            .collect();
        if cleaned.is_empty() {
            self.job_id.clone()
        } else {
            cleaned
        }
    }
}

// ── RestoreJob ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreJob {
    #[serde(flatten)]
    pub job: BackupJob,
    pub snapshot_id: String,
    pub restore_path: String,
    #[serde(default)]
    pub paths: Vec<String>,
}
