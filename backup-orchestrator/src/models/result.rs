use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::job::Tool;

// ── Log entries ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Info,
    Success,
    Error,
    Progress,
    Warning,
    Stats,
    Cmd,
    Ssh,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Info => "info",
            LogType::Success => "success",
            LogType::Error => "error",
            LogType::Progress => "progress",
            LogType::Warning => "warning",
            LogType::Stats => "stats",
            LogType::Cmd => "cmd",
            LogType::Ssh => "ssh",
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub log_type: LogType,
    /// Already masked.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ── Listing values ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub short_id: String,
    pub time: String,
    pub paths: Vec<String>,
    pub hostname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub mode: String,
    pub mtime: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
}

// ── Operation results ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub success: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub bytes_processed: Option<u64>,
    pub files_processed: Option<u64>,
    pub errors: Vec<String>,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    pub success: bool,
    pub installed_tools: Vec<Tool>,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,
}

/// Result of a list-snapshots or list-files call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing<T> {
    pub success: bool,
    pub items: Vec<T>,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_serializes_type_field() {
        let entry = LogEntry {
            log_type: LogType::Progress,
            message: "12%".into(),
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["type"], "progress");
        assert_eq!(v["message"], "12%");
    }

    #[test]
    fn test_deployment_result_camel_case() {
        let r = DeploymentResult {
            success: true,
            installed_tools: vec![Tool::Borg],
            logs: vec![],
            error: None,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["installedTools"][0], "borg");
    }
}
