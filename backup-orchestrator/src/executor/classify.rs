//! Per-tool table mapping stdout lines to log types.

use crate::models::{LogType, Tool};

/// A line matches when it contains every needle.
struct Rule {
    needles: &'static [&'static str],
    log_type: LogType,
}

const fn rule(needles: &'static [&'static str], log_type: LogType) -> Rule {
    Rule { needles, log_type }
}

const BORG: &[Rule] = &[
    rule(&["This archive:"], LogType::Stats),
    rule(&["All archives:"], LogType::Stats),
    rule(&["Original size"], LogType::Stats),
    rule(&["Archive"], LogType::Progress),
    rule(&["Number of files"], LogType::Progress),
];

const RESTIC: &[Rule] = &[
    rule(&["processed "], LogType::Stats),
    rule(&["Added to the repository"], LogType::Stats),
    rule(&["snapshot ", "saved"], LogType::Stats),
    rule(&["ETA"], LogType::Progress),
    rule(&["files"], LogType::Progress),
    rule(&["%"], LogType::Progress),
];

const RSYNC: &[Rule] = &[
    rule(&["Number of regular files transferred"], LogType::Stats),
    rule(&["Total transferred file size"], LogType::Stats),
    rule(&["total size is"], LogType::Stats),
    rule(&["xfr#"], LogType::Progress),
    rule(&["to-chk="], LogType::Progress),
    rule(&["%"], LogType::Progress),
];

const GENERIC: &[Rule] = &[
    rule(&["%"], LogType::Progress),
    rule(&["MB"], LogType::Progress),
    rule(&["files"], LogType::Progress),
];

fn table(tool: Option<Tool>) -> &'static [Rule] {
    match tool {
        Some(Tool::Borg) => BORG,
        Some(Tool::Restic) => RESTIC,
        Some(Tool::Rsync) => RSYNC,
        None => &[],
    }
}

/// Classify one stdout line. Tool rules win over the generic table.
pub fn classify(tool: Option<Tool>, line: &str) -> LogType {
    table(tool)
        .iter()
        .chain(GENERIC)
        .find(|r| r.needles.iter().all(|n| line.contains(n)))
        .map(|r| r.log_type)
        .unwrap_or(LogType::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borg_lines() {
        assert_eq!(classify(Some(Tool::Borg), "This archive:   1.50 GB   800 MB   10 MB"), LogType::Stats);
        assert_eq!(classify(Some(Tool::Borg), "Archive name: nightly-2024"), LogType::Progress);
        assert_eq!(classify(Some(Tool::Borg), "Repository: /backups/repo1"), LogType::Info);
    }

    #[test]
    fn test_restic_summary_beats_progress() {
        assert_eq!(classify(Some(Tool::Restic), "processed 1234 files, 1.5 GiB in 0:12"), LogType::Stats);
        assert_eq!(classify(Some(Tool::Restic), "snapshot 4f2a9c1e saved"), LogType::Stats);
        assert_eq!(classify(Some(Tool::Restic), "[0:05] 42.10%  120 files 1.2 GiB, ETA 0:07"), LogType::Progress);
    }

    #[test]
    fn test_rsync_lines() {
        assert_eq!(classify(Some(Tool::Rsync), "  1,048,576 100%  10.00MB/s  0:00:00 (xfr#1, to-chk=0/3)"), LogType::Progress);
        assert_eq!(classify(Some(Tool::Rsync), "Total transferred file size: 1,048,576 bytes"), LogType::Stats);
    }

    #[test]
    fn test_generic_fallback_without_tool() {
        assert_eq!(classify(None, "Downloading 12 MB"), LogType::Progress);
        assert_eq!(classify(None, "Reading package lists..."), LogType::Info);
    }
}
