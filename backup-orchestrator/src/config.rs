use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How Borg treats an existing repository at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BorgRepoMode {
    /// Delete and re-create the repository on every run. History does not survive.
    #[default]
    Reinitialize,
    /// Initialize only when `borg info` cannot open the repository, then append.
    InitIfMissing,
}

impl BorgRepoMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reinitialize" | "reinit" => Some(BorgRepoMode::Reinitialize),
            "init-if-missing" | "append" => Some(BorgRepoMode::InitIfMissing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Server-held secret used to decrypt stored SSH key material.
    pub encryption_secret: Option<String>,
    pub connect_timeout: Duration,
    pub mount_root: PathBuf,
    pub restic_version: String,
    pub borg_repo_mode: BorgRepoMode,
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            encryption_secret: None,
            connect_timeout: Duration::from_secs(20),
            mount_root: PathBuf::from("/tmp/backup-orchestrator/mounts"),
            restic_version: "0.16.4".into(),
            borg_repo_mode: BorgRepoMode::Reinitialize,
            log_level: "info".into(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let borg_repo_mode = match std::env::var("BORG_REPO_MODE") {
            Ok(v) => BorgRepoMode::parse(&v).unwrap_or_else(|| {
                tracing::warn!(value = %v, "Unknown BORG_REPO_MODE, using reinitialize");
                BorgRepoMode::Reinitialize
            }),
            Err(_) => defaults.borg_repo_mode,
        };

        Self {
            encryption_secret: std::env::var("ENCRYPTION_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            connect_timeout: std::env::var("SSH_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            mount_root: std::env::var("MOUNT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.mount_root),
            restic_version: std::env::var("RESTIC_VERSION").unwrap_or(defaults.restic_version),
            borg_repo_mode,
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }
}
