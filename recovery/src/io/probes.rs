//! Probe execution.
//!
//! The [`ProbeRunner`] trait decouples the investigation loop from how
//! probes actually run. [`CommandProbeRunner`] spawns the probe commands in
//! the workspace; tests use scripted runners.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::evidence::preview;
use crate::core::gaps::baseline_probes;
use crate::core::types::{
    FailureContext, Phase, Probe, ProbeCommand, ProbeCommandResult, ProbeRunResult,
};
use crate::io::config::ProbeConfig;
use crate::io::process::run_command_with_timeout;

const REDACTED: &str = "***";

static KEY_VALUE_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b((?:token|password|passwd|secret|api[_-]?key)=)[^\s&]+")
        .expect("valid key=value secret regex")
});
static FLAG_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(--(?:token|password|secret|api-key)[ =])\S+")
        .expect("valid flag secret regex")
});
static BEARER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(bearer\s+)[A-Za-z0-9._~+/=-]+").expect("valid bearer regex")
});
static SK_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bsk-[A-Za-z0-9_-]{8,}").expect("valid sk key regex"));

/// Result of the round-1 baseline diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticsOutcome {
    pub probe_results: Vec<ProbeRunResult>,
    pub deep_retrieval: Option<Value>,
    pub second_opinion: Option<Value>,
    pub memory_entries: Option<Value>,
    /// True when the baseline time budget ran out before every probe ran.
    pub budget_exhausted: bool,
}

/// Abstraction over probe execution backends.
pub trait ProbeRunner {
    /// Run the baseline diagnostics for a failure.
    fn run_diagnostics(&self, failure: &FailureContext, phase: &Phase)
    -> Result<DiagnosticsOutcome>;

    /// Run a single probe.
    fn run_probe(&self, probe: &Probe) -> Result<ProbeRunResult>;
}

impl<R: ProbeRunner + ?Sized> ProbeRunner for &R {
    fn run_diagnostics(
        &self,
        failure: &FailureContext,
        phase: &Phase,
    ) -> Result<DiagnosticsOutcome> {
        (**self).run_diagnostics(failure, phase)
    }

    fn run_probe(&self, probe: &Probe) -> Result<ProbeRunResult> {
        (**self).run_probe(probe)
    }
}

/// Probe runner that spawns probe commands in the workspace.
#[derive(Debug, Clone)]
pub struct CommandProbeRunner {
    workspace: PathBuf,
    config: ProbeConfig,
    preview_chars: usize,
}

impl CommandProbeRunner {
    pub fn new(workspace: impl Into<PathBuf>, config: ProbeConfig, preview_chars: usize) -> Self {
        Self {
            workspace: workspace.into(),
            config,
            preview_chars,
        }
    }

    #[instrument(skip_all, fields(command = %command.display()))]
    fn run_command(&self, command: &ProbeCommand) -> ProbeCommandResult {
        let redacted_command = redact(&command.display());
        let Some((program, args)) = command.argv.split_first() else {
            return unresolved(redacted_command, "empty probe command".to_string());
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workspace);
        let output = match run_command_with_timeout(
            cmd,
            None,
            Duration::from_secs(self.config.timeout_secs),
            self.config.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "probe command could not run");
                return unresolved(redacted_command, format!("{err:#}"));
            }
        };
        let exit_code = output.exit_code();
        debug!(?exit_code, timed_out = output.timed_out, "probe command finished");
        ProbeCommandResult {
            redacted_command,
            exit_code,
            stdout_preview: preview(&redact(&output.stdout_text()), self.preview_chars),
            stderr_preview: preview(&redact(&output.stderr_text()), self.preview_chars),
            resolved: output.success(),
        }
    }
}

impl ProbeRunner for CommandProbeRunner {
    #[instrument(skip_all, fields(failure_class = %failure.failure_class, phase_id = %phase.id))]
    fn run_diagnostics(
        &self,
        failure: &FailureContext,
        phase: &Phase,
    ) -> Result<DiagnosticsOutcome> {
        let budget = Duration::from_secs(self.config.baseline_budget_secs);
        let started = Instant::now();
        let mut outcome = DiagnosticsOutcome::default();
        for probe in baseline_probes(failure, phase) {
            if started.elapsed() >= budget {
                warn!(probe = %probe.name, "baseline diagnostics budget exhausted");
                outcome.budget_exhausted = true;
                break;
            }
            outcome.probe_results.push(self.run_probe(&probe)?);
        }
        info!(
            probe_count = outcome.probe_results.len(),
            budget_exhausted = outcome.budget_exhausted,
            "baseline diagnostics finished"
        );
        Ok(outcome)
    }

    #[instrument(skip_all, fields(probe = %probe.name))]
    fn run_probe(&self, probe: &Probe) -> Result<ProbeRunResult> {
        let commands = probe.commands.iter().map(|c| self.run_command(c)).collect();
        Ok(ProbeRunResult {
            probe_name: probe.name.clone(),
            commands,
        })
    }
}

fn unresolved(redacted_command: String, error: String) -> ProbeCommandResult {
    ProbeCommandResult {
        redacted_command,
        exit_code: None,
        stdout_preview: String::new(),
        stderr_preview: error,
        resolved: false,
    }
}

/// Mask credentials in a command line or its output.
pub fn redact(text: &str) -> String {
    let text = KEY_VALUE_SECRET_RE.replace_all(text, format!("${{1}}{REDACTED}"));
    let text = FLAG_SECRET_RE.replace_all(&text, format!("${{1}}{REDACTED}"));
    let text = BEARER_RE.replace_all(&text, format!("${{1}}{REDACTED}"));
    SK_KEY_RE.replace_all(&text, format!("sk-{REDACTED}")).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_common_secret_shapes() {
        assert_eq!(
            redact("curl -H 'Authorization: Bearer abc.def' https://x?token=123&y=2"),
            "curl -H 'Authorization: Bearer ***' https://x?token=***&y=2"
        );
        assert_eq!(
            redact("login --password hunter2 --user bob"),
            "login --password *** --user bob"
        );
        assert_eq!(redact("export OPENAI=sk-abcdefghijkl"), "export OPENAI=sk-***");
        assert_eq!(redact("git diff --stat"), "git diff --stat");
    }

    #[cfg(unix)]
    #[test]
    fn runs_probe_commands_in_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("a.txt"), "hello api_key=supersecret\n").expect("write");
        let runner = CommandProbeRunner::new(temp.path(), ProbeConfig::default(), 10);
        let probe = Probe {
            name: "read".to_string(),
            commands: vec![
                ProbeCommand::new(["cat", "a.txt"]),
                ProbeCommand::new(["cat", "missing.txt"]),
            ],
        };
        let result = runner.run_probe(&probe).expect("probe");
        assert_eq!(result.probe_name, "read");
        assert!(result.commands[0].resolved);
        assert_eq!(result.commands[0].stdout_preview, "hello api_");
        assert!(!result.commands[1].resolved);
        assert_ne!(result.commands[1].exit_code, Some(0));
        assert!(!result.resolved());
    }

    #[test]
    fn missing_program_is_unresolved_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = CommandProbeRunner::new(temp.path(), ProbeConfig::default(), 500);
        let probe = Probe {
            name: "nope".to_string(),
            commands: vec![
                ProbeCommand::new(["definitely-not-a-real-binary-xyz", "--token", "abc"]),
                ProbeCommand::new(Vec::<String>::new()),
            ],
        };
        let result = runner.run_probe(&probe).expect("probe");
        assert_eq!(result.commands[0].exit_code, None);
        assert_eq!(
            result.commands[0].redacted_command,
            "definitely-not-a-real-binary-xyz --token ***"
        );
        assert_eq!(result.commands[1].stderr_preview, "empty probe command");
    }

    #[test]
    fn zero_budget_exhausts_before_first_probe() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = ProbeConfig {
            baseline_budget_secs: 0,
            ..ProbeConfig::default()
        };
        let runner = CommandProbeRunner::new(temp.path(), config, 500);
        let outcome = runner
            .run_diagnostics(&FailureContext::default(), &Phase::default())
            .expect("diagnostics");
        assert!(outcome.budget_exhausted);
        assert!(outcome.probe_results.is_empty());
    }
}
