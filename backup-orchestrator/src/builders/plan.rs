//! Typed command plans.
//!
//! Builders produce a [`CommandPlan`]; [`CommandPlan::to_shell`] is the single
//! place where arguments and environment values become shell text.

use crate::utils::shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Nonzero exit stops the chain.
    Abort,
    /// Failure is tolerated and the chain continues.
    Ignore,
    /// Exit codes up to and including the given value count as success.
    AllowWarnings(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub policy: FailurePolicy,
    /// Discard stderr of this command.
    pub quiet: bool,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            policy: FailurePolicy::Abort,
            quiet: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    fn render_bare(&self) -> String {
        let mut out = shell::quote(&self.program).into_owned();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&shell::quote(arg));
        }
        if self.quiet {
            out.push_str(" 2>/dev/null");
        }
        out
    }

    fn render(&self) -> String {
        let bare = self.render_bare();
        match self.policy {
            FailurePolicy::Abort => bare,
            FailurePolicy::Ignore => format!("({bare} || true)"),
            FailurePolicy::AllowWarnings(max) => format!("({bare} || [ $? -le {max} ])"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Run(CommandSpec),
    /// Run `run` only when `probe` fails.
    Unless { probe: CommandSpec, run: CommandSpec },
    /// Pipe the value of an exported variable into `run`'s stdin.
    FeedEnv { var: String, run: CommandSpec },
    ChangeDir(String),
}

impl Step {
    fn render(&self) -> String {
        match self {
            Step::Run(spec) => spec.render(),
            Step::Unless { probe, run } => {
                format!("({} >/dev/null 2>&1 || {})", probe.render_bare(), run.render())
            }
            Step::FeedEnv { var, run } => {
                format!("(printf '%s\\n' \"${var}\" | {})", run.render())
            }
            Step::ChangeDir(dir) => format!("cd {}", shell::quote(dir)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandPlan {
    pub env: Vec<(String, String)>,
    pub steps: Vec<Step>,
}

impl CommandPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn run(mut self, spec: CommandSpec) -> Self {
        self.steps.push(Step::Run(spec));
        self
    }

    pub fn unless(mut self, probe: CommandSpec, run: CommandSpec) -> Self {
        self.steps.push(Step::Unless { probe, run });
        self
    }

    pub fn feed_env(mut self, var: &str, run: CommandSpec) -> Self {
        self.steps.push(Step::FeedEnv { var: var.to_string(), run });
        self
    }

    pub fn cd(mut self, dir: &str) -> Self {
        self.steps.push(Step::ChangeDir(dir.to_string()));
        self
    }

    pub fn programs(&self) -> impl Iterator<Item = &CommandSpec> {
        self.steps.iter().flat_map(|s| match s {
            Step::Run(spec) => vec![spec],
            Step::Unless { probe, run } => vec![probe, run],
            Step::FeedEnv { run, .. } => vec![run],
            Step::ChangeDir(_) => vec![],
        })
    }

    /// Serialize to one `sh` command line.
    pub fn to_shell(&self) -> String {
        let chain = self
            .steps
            .iter()
            .map(Step::render)
            .collect::<Vec<_>>()
            .join(" && ");
        if self.env.is_empty() {
            return chain;
        }
        let exports = self
            .env
            .iter()
            .map(|(k, v)| format!("{k}={}", shell::quote(v)))
            .collect::<Vec<_>>()
            .join(" ");
        format!("export {exports}; {chain}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_chain_with_policies() {
        let plan = CommandPlan::new()
            .run(CommandSpec::new("mkdir").args(["-p", "/a b"]))
            .run(CommandSpec::new("restic").arg("init").policy(FailurePolicy::Ignore).quiet())
            .run(CommandSpec::new("borg").arg("extract").policy(FailurePolicy::AllowWarnings(1)));
        assert_eq!(
            plan.to_shell(),
            "mkdir -p '/a b' && (restic init 2>/dev/null || true) && (borg extract || [ $? -le 1 ])"
        );
    }

    #[test]
    fn test_env_exported_once_and_quoted() {
        let plan = CommandPlan::new()
            .env("BORG_PASSPHRASE", "p w")
            .env("BORG_RELOCATED_REPO_ACCESS_IS_OK", "yes")
            .run(CommandSpec::new("borg").arg("list"));
        assert_eq!(
            plan.to_shell(),
            "export BORG_PASSPHRASE='p w' BORG_RELOCATED_REPO_ACCESS_IS_OK=yes; borg list"
        );
    }

    #[test]
    fn test_unless_and_cd() {
        let plan = CommandPlan::new()
            .cd("/restore")
            .unless(CommandSpec::new("borg").args(["info", "/r"]), CommandSpec::new("borg").args(["init", "/r"]));
        assert_eq!(plan.to_shell(), "cd /restore && (borg info /r >/dev/null 2>&1 || borg init /r)");
        assert_eq!(plan.programs().count(), 2);
    }

    #[test]
    fn test_feed_env_pipes_variable() {
        let plan = CommandPlan::new()
            .env("SSHPASS", "pw")
            .feed_env("SSHPASS", CommandSpec::new("sshfs").args(["-o", "password_stdin"]));
        assert_eq!(
            plan.to_shell(),
            "export SSHPASS=pw; (printf '%s\\n' \"$SSHPASS\" | sshfs -o password_stdin)"
        );
    }

    #[test]
    fn test_injection_is_quoted() {
        let plan = CommandPlan::new().run(CommandSpec::new("rsync").arg("/src; rm -rf /"));
        assert_eq!(plan.to_shell(), "rsync '/src; rm -rf /'");
    }
}
