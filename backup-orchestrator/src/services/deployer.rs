//! Installs backup tools on a connected system.

use std::fmt;

use crate::builders::{CommandPlan, CommandSpec};
use crate::executor::{CommandExecutor, LogRecorder};
use crate::models::{DeploymentResult, LogType, Tool};

const RESTIC_INSTALL_PATH: &str = "/usr/local/bin/restic";
const UNKNOWN_OS: &str = "Unknown Linux";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Credentials,
    Connecting,
    DetectingOs,
    Installing,
    Done { success: bool },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Credentials => f.write_str("credentials"),
            Stage::Connecting => f.write_str("connecting"),
            Stage::DetectingOs => f.write_str("detecting-os"),
            Stage::Installing => f.write_str("installing"),
            Stage::Done { success: true } => f.write_str("done (success)"),
            Stage::Done { success: false } => f.write_str("done (failure)"),
        }
    }
}

pub fn enter_stage(recorder: &LogRecorder, stage: Stage) {
    tracing::info!(stage = %stage, "Deployment stage");
    recorder.log(LogType::Info, &format!("Deployment stage: {stage}"));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Pacman,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsInfo {
    pub name: String,
    pub package_manager: PackageManager,
}

impl OsInfo {
    fn unknown() -> Self {
        Self { name: UNKNOWN_OS.into(), package_manager: PackageManager::Apt }
    }
}

fn os_release_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .filter_map(|l| l.trim().split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.trim().trim_matches('"').trim_matches('\''))
}

/// Classify `/etc/os-release` by `ID` and `ID_LIKE`. Inconclusive input yields apt.
pub fn parse_os_release(text: &str) -> OsInfo {
    let id = os_release_value(text, "ID").unwrap_or_default().to_ascii_lowercase();
    let like = os_release_value(text, "ID_LIKE").unwrap_or_default().to_ascii_lowercase();
    let markers: Vec<&str> = id.split_whitespace().chain(like.split_whitespace()).collect();

    let has = |names: &[&str]| markers.iter().any(|m| names.contains(m));
    let package_manager = if has(&["debian", "ubuntu", "raspbian", "linuxmint", "pop"]) {
        PackageManager::Apt
    } else if has(&["fedora", "rhel", "centos", "rocky", "almalinux", "ol"]) {
        PackageManager::Dnf
    } else if has(&["arch", "manjaro", "endeavouros"]) {
        PackageManager::Pacman
    } else {
        return OsInfo::unknown();
    };

    let name = os_release_value(text, "PRETTY_NAME")
        .or_else(|| os_release_value(text, "NAME"))
        .filter(|n| !n.is_empty())
        .unwrap_or(UNKNOWN_OS)
        .to_string();
    OsInfo { name, package_manager }
}

/// Map `uname -m` to the restic release architecture.
pub fn restic_arch(machine: &str) -> Option<&'static str> {
    match machine.trim() {
        "x86_64" | "amd64" => Some("amd64"),
        "aarch64" | "arm64" => Some("arm64"),
        m if m.starts_with("armv") || m == "arm" => Some("arm"),
        _ => None,
    }
}

fn package_name(tool: Tool, pm: PackageManager) -> &'static str {
    match (tool, pm) {
        (Tool::Borg, PackageManager::Pacman) => "borg",
        (Tool::Borg, _) => "borgbackup",
        (Tool::Rsync, _) => "rsync",
        (Tool::Restic, _) => "restic",
    }
}

pub struct Deployer<'a> {
    exec: &'a dyn CommandExecutor,
    restic_version: String,
    use_sudo: bool,
}

impl<'a> Deployer<'a> {
    /// Checks whether the remote user is root; everyone else goes through `sudo -n`.
    pub async fn prepare(exec: &'a dyn CommandExecutor, restic_version: &str) -> Deployer<'a> {
        let is_root = match exec.exec_captured("id -u").await {
            Ok(out) if out.success() => out.stdout.trim() == "0",
            _ => false,
        };
        Deployer { exec, restic_version: restic_version.to_string(), use_sudo: !is_root }
    }

    fn privileged(&self, program: &str) -> CommandSpec {
        if self.use_sudo {
            CommandSpec::new("sudo").args(["-n", program])
        } else {
            CommandSpec::new(program)
        }
    }

    /// Never fails; falls back to apt.
    pub async fn detect_os(&self) -> OsInfo {
        let info = match self.exec.exec_captured("cat /etc/os-release").await {
            Ok(out) if out.success() => parse_os_release(&out.stdout),
            Ok(_) | Err(_) => OsInfo::unknown(),
        };
        self.exec.log(
            LogType::Info,
            &format!("Detected {} ({:?} package manager)", info.name, info.package_manager),
        );
        info
    }

    fn package_plan(&self, tool: Tool, pm: PackageManager) -> CommandPlan {
        let package = package_name(tool, pm);
        match pm {
            PackageManager::Apt => CommandPlan::new()
                .run(self.privileged("apt-get").args(["update", "-qq"]))
                .run(self.privileged("env").args([
                    "DEBIAN_FRONTEND=noninteractive",
                    "apt-get",
                    "install",
                    "-y",
                    package,
                ])),
            PackageManager::Dnf => {
                CommandPlan::new().run(self.privileged("dnf").args(["install", "-y", package]))
            }
            PackageManager::Pacman => CommandPlan::new()
                .run(self.privileged("pacman").args(["-Sy", "--noconfirm", "--needed", package])),
        }
    }

    fn restic_plan(&self, arch: &str) -> CommandPlan {
        let v = &self.restic_version;
        let url = format!(
            "https://github.com/restic/restic/releases/download/v{v}/restic_{v}_linux_{arch}.bz2"
        );
        let archive = format!("/tmp/restic_{v}_linux_{arch}.bz2");
        let binary = archive.trim_end_matches(".bz2").to_string();

        CommandPlan::new()
            .unless(
                CommandSpec::new("curl").args(["-fsSL", "-o", &archive, &url]),
                CommandSpec::new("wget").args(["-q", "-O", &archive, &url]),
            )
            .run(CommandSpec::new("bunzip2").args(["-f", &archive]))
            .run(self.privileged("mv").args([binary.as_str(), RESTIC_INSTALL_PATH]))
            .run(self.privileged("chmod").args(["+x", RESTIC_INSTALL_PATH]))
    }

    async fn verify(&self, tool: Tool) -> bool {
        let command = match tool {
            Tool::Borg => "borg --version".to_string(),
            Tool::Restic => format!("{RESTIC_INSTALL_PATH} version"),
            Tool::Rsync => "rsync --version".to_string(),
        };
        match self.exec.exec_captured(&command).await {
            Ok(out) => out.success() && out.stdout.to_ascii_lowercase().contains(tool.as_str()),
            Err(_) => false,
        }
    }

    /// Logs an error and returns false on any failure.
    pub async fn install_tool(&self, tool: Tool, pm: PackageManager) -> bool {
        self.exec.log(LogType::Info, &format!("Installing {tool}"));

        let plan = match tool {
            Tool::Restic => {
                let machine = match self.exec.exec_captured("uname -m").await {
                    Ok(out) if out.success() => out.stdout,
                    _ => String::new(),
                };
                match restic_arch(&machine) {
                    Some(arch) => self.restic_plan(arch),
                    None => {
                        self.exec.log(
                            LogType::Error,
                            &format!("No restic build for architecture '{}'", machine.trim()),
                        );
                        return false;
                    }
                }
            }
            _ => self.package_plan(tool, pm),
        };

        match self.exec.exec_plan(&plan).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                self.exec.log(
                    LogType::Error,
                    &format!("Installing {tool} failed: {}", out.failure_message()),
                );
                return false;
            }
            Err(e) => {
                self.exec.log(LogType::Error, &format!("Installing {tool} failed: {e}"));
                return false;
            }
        }

        if !self.verify(tool).await {
            self.exec.log(LogType::Error, &format!("{tool} did not report a version after install"));
            return false;
        }
        self.exec.log(LogType::Success, &format!("{tool} installed"));
        true
    }

    /// Succeeds when at least one requested tool ends up installed.
    pub async fn deploy(&self, tools: &[Tool]) -> DeploymentResult {
        let mut selected: Vec<Tool> = Vec::new();
        for t in tools {
            if !selected.contains(t) {
                selected.push(*t);
            }
        }
        if selected.is_empty() {
            self.exec.log(LogType::Error, "No tools selected for deployment");
            return DeploymentResult {
                success: false,
                installed_tools: Vec::new(),
                logs: self.exec.recorder().entries(),
                error: Some("No tools selected for deployment".into()),
            };
        }

        enter_stage(self.exec.recorder(), Stage::DetectingOs);
        let os = self.detect_os().await;

        enter_stage(self.exec.recorder(), Stage::Installing);
        let mut installed = Vec::new();
        for tool in &selected {
            if self.install_tool(*tool, os.package_manager).await {
                installed.push(*tool);
            }
        }

        let success = !installed.is_empty();
        enter_stage(self.exec.recorder(), Stage::Done { success });
        let error = if success {
            None
        } else {
            let names: Vec<&str> = selected.iter().map(Tool::as_str).collect();
            let message = format!("Failed to install any of: {}", names.join(", "));
            self.exec.log(LogType::Error, &message);
            Some(message)
        };

        DeploymentResult {
            success,
            installed_tools: installed,
            logs: self.exec.recorder().entries(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::ScriptedExecutor;

    const UBUNTU: &str = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nPRETTY_NAME=\"Ubuntu 22.04.4 LTS\"\n";

    fn base() -> ScriptedExecutor {
        ScriptedExecutor::new()
            .on("id -u", 0, "1000\n", "")
            .on("os-release", 0, UBUNTU, "")
            .on("uname -m", 0, "x86_64\n", "")
    }

    #[test]
    fn test_parse_os_release_families() {
        assert_eq!(parse_os_release(UBUNTU).package_manager, PackageManager::Apt);
        assert_eq!(parse_os_release(UBUNTU).name, "Ubuntu 22.04.4 LTS");

        let rocky = "ID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\nPRETTY_NAME=\"Rocky Linux 9\"";
        assert_eq!(parse_os_release(rocky).package_manager, PackageManager::Dnf);

        let arch = "NAME=\"Arch Linux\"\nID=arch";
        assert_eq!(parse_os_release(arch).package_manager, PackageManager::Pacman);
        assert_eq!(parse_os_release(arch).name, "Arch Linux");

        let odd = "ID=plan9";
        assert_eq!(parse_os_release(odd), OsInfo { name: UNKNOWN_OS.into(), package_manager: PackageManager::Apt });
    }

    #[test]
    fn test_restic_arch_mapping() {
        assert_eq!(restic_arch("x86_64\n"), Some("amd64"));
        assert_eq!(restic_arch("aarch64"), Some("arm64"));
        assert_eq!(restic_arch("armv7l"), Some("arm"));
        assert_eq!(restic_arch("riscv64"), None);
    }

    #[tokio::test]
    async fn test_partial_success_reports_installed_subset() {
        let exec = base()
            .on("curl", 1, "", "curl: (6) Could not resolve host: github.com")
            .on("borg --version", 0, "borg 1.2.7\n", "");
        let deployer = Deployer::prepare(&exec, "0.16.4").await;
        let result = deployer.deploy(&[Tool::Borg, Tool::Restic]).await;

        assert!(result.success);
        assert_eq!(result.installed_tools, vec![Tool::Borg]);
        assert!(result.error.is_none());
        assert!(result.logs.iter().any(|e| e.log_type == LogType::Error && e.message.contains("restic")));

        let commands = exec.commands();
        assert!(commands.iter().any(|c| c.contains("sudo -n env DEBIAN_FRONTEND=noninteractive apt-get install -y borgbackup")));
        assert!(commands.iter().any(|c| c.contains("restic_0.16.4_linux_amd64.bz2")));
    }

    #[tokio::test]
    async fn test_all_installers_failing_is_failure() {
        let exec = base()
            .on("apt-get", 100, "", "E: Unable to locate package borgbackup")
            .on("curl", 1, "", "curl: (22) 404");
        let deployer = Deployer::prepare(&exec, "0.16.4").await;
        let result = deployer.deploy(&[Tool::Borg, Tool::Restic]).await;

        assert!(!result.success);
        assert!(result.installed_tools.is_empty());
        assert!(result.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(!result.logs.is_empty());
    }

    #[tokio::test]
    async fn test_missing_version_output_fails_install() {
        let exec = base().on("rsync --version", 127, "", "rsync: command not found");
        let deployer = Deployer::prepare(&exec, "0.16.4").await;
        assert!(!deployer.install_tool(Tool::Rsync, PackageManager::Apt).await);
    }

    #[tokio::test]
    async fn test_root_user_skips_sudo() {
        let exec = ScriptedExecutor::new()
            .on("id -u", 0, "0\n", "")
            .on("rsync --version", 0, "rsync  version 3.2.7  protocol version 31\n", "");
        let deployer = Deployer::prepare(&exec, "0.16.4").await;
        assert!(deployer.install_tool(Tool::Rsync, PackageManager::Dnf).await);
        assert!(exec.commands().iter().any(|c| c == "dnf install -y rsync"));
        assert!(exec.commands().iter().all(|c| !c.contains("sudo")));
    }

    #[tokio::test]
    async fn test_unknown_architecture_fails_restic_only() {
        let exec = ScriptedExecutor::new().on("uname -m", 0, "riscv64\n", "");
        let deployer = Deployer::prepare(&exec, "0.16.4").await;
        assert!(!deployer.install_tool(Tool::Restic, PackageManager::Apt).await);
        assert!(exec.commands().iter().all(|c| !c.contains("bunzip2")));
    }

    #[tokio::test]
    async fn test_empty_selection_is_failure() {
        let exec = ScriptedExecutor::new();
        let result = Deployer::prepare(&exec, "0.16.4").await.deploy(&[]).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::DetectingOs.to_string(), "detecting-os");
        assert_eq!(Stage::Done { success: false }.to_string(), "done (failure)");
    }
}
