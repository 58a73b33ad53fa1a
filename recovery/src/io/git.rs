//! Narrow git port used by checkpointing.
//!
//! Only `tag`, `reset --hard`, `clean -fd`, `checkout`, `add -A`, `commit`
//! and `rev-parse` are ever issued through it.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::io::process::run_command_with_timeout;

const GIT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;

/// Result of one git invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when git was killed.
    pub exit_code: Option<i32>,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stderr if present, else stdout, trimmed. Git reports some conditions
    /// (e.g. "nothing to commit") on stdout.
    pub fn message(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Executes git subcommands in a workspace.
///
/// `Err` means git could not be run at all (missing binary, timeout); a git
/// command that ran and failed is an `Ok` with a non-zero exit code.
pub trait GitPort {
    fn exec(&self, workspace: &Path, args: &[&str]) -> Result<GitOutput>;
}

impl<G: GitPort + ?Sized> GitPort for &G {
    fn exec(&self, workspace: &Path, args: &[&str]) -> Result<GitOutput> {
        (**self).exec(workspace, args)
    }
}

/// [`GitPort`] backed by the `git` binary on `PATH`.
#[derive(Debug, Clone)]
pub struct SystemGit {
    timeout: Duration,
}

impl SystemGit {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemGit {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl GitPort for SystemGit {
    #[instrument(skip_all, fields(subcommand = args.first().copied().unwrap_or_default()))]
    fn exec(&self, workspace: &Path, args: &[&str]) -> Result<GitOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(workspace);
        let output = run_command_with_timeout(cmd, None, self.timeout, GIT_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run git {}", args.join(" ")))?;
        if output.timed_out {
            anyhow::bail!(
                "git {} timed out after {}s",
                args.join(" "),
                self.timeout.as_secs()
            );
        }
        let result = GitOutput {
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            exit_code: output.exit_code(),
        };
        debug!(exit_code = ?result.exit_code, "git finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_prefers_stderr() {
        let out = GitOutput {
            stdout: "nothing to commit, working tree clean\n".to_string(),
            stderr: String::new(),
            exit_code: Some(1),
        };
        assert_eq!(out.message(), "nothing to commit, working tree clean");
        let out = GitOutput {
            stderr: "fatal: not a git repository\n".to_string(),
            ..out
        };
        assert_eq!(out.message(), "fatal: not a git repository");
        assert!(!out.success());
    }

    #[test]
    fn system_git_runs_outside_a_repository() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = SystemGit::default()
            .exec(dir.path(), &["rev-parse", "HEAD"])
            .expect("git runs");
        assert!(!out.success());
    }
}
