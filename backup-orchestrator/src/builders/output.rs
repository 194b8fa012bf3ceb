//! Parsers for tool output: listing JSON and end-of-run summaries.

use anyhow::Context;
use serde::Deserialize;

use crate::error::Result;
use crate::models::{FileEntry, FileType, Snapshot, Tool};

// ── Snapshot listings ──

#[derive(Deserialize)]
struct BorgList {
    #[serde(default)]
    archives: Vec<BorgArchive>,
}

#[derive(Deserialize)]
struct BorgArchive {
    name: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
}

/// `borg list --json`. Archive names double as ids since restore addresses them by name.
pub fn parse_borg_archives(stdout: &str) -> Result<Vec<Snapshot>> {
    let list: BorgList = serde_json::from_str(stdout.trim()).context("invalid borg list output")?;
    Ok(list
        .archives
        .into_iter()
        .map(|a| Snapshot {
            short_id: a.id.chars().take(8).collect(),
            time: a.start.or(a.time).unwrap_or_default(),
            paths: Vec::new(),
            hostname: a.hostname.unwrap_or_default(),
            id: a.name,
        })
        .collect())
}

#[derive(Deserialize)]
struct ResticSnapshot {
    id: String,
    #[serde(default)]
    short_id: Option<String>,
    time: String,
    #[serde(default)]
    paths: Vec<String>,
    #[serde(default)]
    hostname: String,
}

/// `restic snapshots --json`.
pub fn parse_restic_snapshots(stdout: &str) -> Result<Vec<Snapshot>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let snaps: Vec<ResticSnapshot> = serde_json::from_str(trimmed).context("invalid restic snapshots output")?;
    Ok(snaps
        .into_iter()
        .map(|s| Snapshot {
            short_id: s.short_id.unwrap_or_else(|| s.id.chars().take(8).collect()),
            id: s.id,
            time: s.time,
            paths: s.paths,
            hostname: s.hostname,
        })
        .collect())
}

// ── File listings ──

#[derive(Deserialize)]
struct BorgItem {
    path: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    mode: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    mtime: String,
}

/// `borg list --json-lines`, one item per line.
pub fn parse_borg_files(stdout: &str) -> Result<Vec<FileEntry>> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let item: BorgItem = serde_json::from_str(line).context("invalid borg item line")?;
            Ok(FileEntry {
                file_type: match item.kind.as_str() {
                    "-" => FileType::File,
                    "d" => FileType::Directory,
                    _ => FileType::Other,
                },
                path: format!("/{}", item.path.trim_start_matches('/')),
                size: item.size,
                mode: item.mode,
                mtime: item.mtime,
            })
        })
        .collect()
}

#[derive(Deserialize)]
struct ResticNode {
    #[serde(default)]
    struct_type: String,
    #[serde(default)]
    path: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    mode: u32,
    #[serde(default)]
    mtime: String,
}

/// `restic ls --json`. The leading snapshot record is skipped.
pub fn parse_restic_files(stdout: &str) -> Result<Vec<FileEntry>> {
    let mut entries = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let node: ResticNode = serde_json::from_str(line).context("invalid restic ls line")?;
        if node.struct_type == "snapshot" || node.path.is_empty() {
            continue;
        }
        entries.push(FileEntry {
            file_type: match node.kind.as_str() {
                "file" => FileType::File,
                "dir" => FileType::Directory,
                _ => FileType::Other,
            },
            path: node.path,
            size: node.size,
            mode: format!("{:o}", node.mode & 0o7777),
            mtime: node.mtime,
        });
    }
    Ok(entries)
}

pub fn parse_snapshots(tool: Tool, stdout: &str) -> Result<Vec<Snapshot>> {
    match tool {
        Tool::Borg => parse_borg_archives(stdout),
        _ => parse_restic_snapshots(stdout),
    }
}

pub fn parse_files(tool: Tool, stdout: &str) -> Result<Vec<FileEntry>> {
    match tool {
        Tool::Borg => parse_borg_files(stdout),
        _ => parse_restic_files(stdout),
    }
}

// ── Run summaries ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub bytes: Option<u64>,
    pub files: Option<u64>,
}

/// Extract byte/file totals from a tool's summary output. Missing values stay None.
pub fn parse_stats(tool: Tool, text: &str) -> RunStats {
    let mut stats = RunStats::default();
    for line in text.lines().map(str::trim) {
        match tool {
            Tool::Borg => {
                if let Some(rest) = line.strip_prefix("Number of files:") {
                    stats.files = parse_count(rest);
                } else if let Some(rest) = line.strip_prefix("This archive:") {
                    stats.bytes = parse_size(rest);
                }
            }
            Tool::Restic => {
                // processed 1234 files, 1.234 GiB in 0:12
                if let Some(rest) = line.strip_prefix("processed ") {
                    if let Some((count, tail)) = rest.split_once(" files, ") {
                        stats.files = parse_count(count);
                        stats.bytes = parse_size(tail.split(" in ").next().unwrap_or(tail));
                    }
                }
            }
            Tool::Rsync => {
                if let Some(rest) = line.strip_prefix("Number of regular files transferred:") {
                    stats.files = parse_count(rest);
                } else if let Some(rest) = line.strip_prefix("Total transferred file size:") {
                    stats.bytes = parse_count(rest.trim().trim_end_matches("bytes"));
                }
            }
        }
    }
    stats
}

/// Leading integer, tolerating thousands separators.
fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| *c != ',')
        .collect();
    digits.parse().ok()
}

/// `1.23 GB`, `512 KiB`, `17 B`. Only the first number/unit pair is read.
pub fn parse_size(text: &str) -> Option<u64> {
    let mut parts = text.split_whitespace();
    let number: f64 = parts.next()?.replace(',', "").parse().ok()?;
    let multiplier: f64 = match parts.next().unwrap_or("B") {
        "B" | "bytes" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((number * multiplier).round() as u64)
}
