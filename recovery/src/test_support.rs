//! Test-only fakes for the recovery pipeline's external collaborators.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::decision::DecisionPolicy;
use crate::core::doctor::{
    ActionOutcome, ActionTaken, ContextSummary, DecisionAuditEntry, DoctorRequest, DoctorResponse,
    HealthBudget,
};
use crate::core::evidence::EvidenceBundle;
use crate::core::types::{
    Decision, DecisionType, FailureContext, Phase, PhaseState, Probe, ProbeCommandResult,
    ProbeRunResult,
};
use crate::io::backend::DiagnosticBackend;
use crate::io::git::{GitOutput, GitPort};
use crate::io::hooks::PhaseHooks;
use crate::io::probes::{DiagnosticsOutcome, ProbeRunner};

/// [`GitPort`] that records every call and replays queued outputs.
///
/// Once the queue is empty every call succeeds with empty output.
#[derive(Debug, Default)]
pub struct RecordingGit {
    responses: Mutex<VecDeque<GitOutput>>,
    failure: Option<String>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, output: GitOutput) -> Self {
        self.responses.lock().expect("responses lock").push_back(output);
        self
    }

    /// Make every call fail as if git could not be spawned.
    pub fn fail_with(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl GitPort for RecordingGit {
    fn exec(&self, _workspace: &Path, args: &[&str]) -> Result<GitOutput> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(args.iter().map(ToString::to_string).collect());
        if let Some(message) = &self.failure {
            return Err(anyhow!("{message}"));
        }
        Ok(self
            .responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or(GitOutput {
                exit_code: Some(0),
                ..GitOutput::default()
            }))
    }
}

/// Real git repository in a temp dir with one initial commit on `main`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let repo = Self {
            dir: tempfile::tempdir().expect("tempdir"),
        };
        repo.git(&["init", "-q"]);
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo.git(&["config", "user.email", "recovery@example.com"]);
        repo.git(&["config", "user.name", "Recovery Tests"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo.git(&["config", "tag.gpgsign", "false"]);
        repo.write("README.md", "test repo\n");
        repo.commit_all("initial");
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn file(&self, rel: &str) -> PathBuf {
        self.path().join(rel)
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.file(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.file(rel)).expect("read file")
    }

    pub fn commit_all(&self, message: &str) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Run git in the repo, panicking on failure. Returns stdout.
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Recorded `execute_doctor` call.
pub type BackendCall = (DoctorRequest, ContextSummary, bool);

/// [`DiagnosticBackend`] replaying queued responses or errors.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<DoctorResponse, String>>>,
    requests: Mutex<Vec<BackendCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: DoctorResponse) -> Self {
        self.replies.lock().expect("replies lock").push_back(Ok(response));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.replies
            .lock()
            .expect("replies lock")
            .push_back(Err(message.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<BackendCall> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl DiagnosticBackend for ScriptedBackend {
    fn execute_doctor(
        &self,
        request: &DoctorRequest,
        context: &ContextSummary,
        allow_escalation: bool,
    ) -> Result<DoctorResponse> {
        self.requests.lock().expect("requests lock").push((
            request.clone(),
            context.clone(),
            allow_escalation,
        ));
        match self.replies.lock().expect("replies lock").pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!("{message}")),
            None => Err(anyhow!("no scripted doctor response left")),
        }
    }
}

/// Probe result with one command whose outcome is `resolved`.
pub fn probe_result(name: &str, resolved: bool) -> ProbeRunResult {
    ProbeRunResult {
        probe_name: name.to_string(),
        commands: vec![ProbeCommandResult {
            redacted_command: format!("probe {name}"),
            exit_code: Some(if resolved { 0 } else { 1 }),
            stdout_preview: format!("{name} output"),
            stderr_preview: String::new(),
            resolved,
        }],
    }
}

/// [`ProbeRunner`] with canned diagnostics; targeted probes succeed unless
/// told to fail.
#[derive(Debug, Default)]
pub struct ScriptedProbeRunner {
    baseline: Vec<ProbeRunResult>,
    deep_retrieval: Option<Value>,
    second_opinion: Option<Value>,
    fail_diagnostics: bool,
    fail_probes: bool,
    probes_run: Mutex<Vec<String>>,
}

impl ScriptedProbeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baseline(mut self, results: Vec<ProbeRunResult>) -> Self {
        self.baseline = results;
        self
    }

    pub fn with_deep_retrieval(mut self, value: Value) -> Self {
        self.deep_retrieval = Some(value);
        self
    }

    pub fn with_second_opinion(mut self, value: Value) -> Self {
        self.second_opinion = Some(value);
        self
    }

    pub fn failing_diagnostics(mut self) -> Self {
        self.fail_diagnostics = true;
        self
    }

    pub fn failing_probes(mut self) -> Self {
        self.fail_probes = true;
        self
    }

    /// Names of targeted probes run so far, in order.
    pub fn probes_run(&self) -> Vec<String> {
        self.probes_run.lock().expect("probes lock").clone()
    }
}

impl ProbeRunner for ScriptedProbeRunner {
    fn run_diagnostics(
        &self,
        _failure: &FailureContext,
        _phase: &Phase,
    ) -> Result<DiagnosticsOutcome> {
        if self.fail_diagnostics {
            return Err(anyhow!("diagnostics unavailable"));
        }
        Ok(DiagnosticsOutcome {
            probe_results: self.baseline.clone(),
            deep_retrieval: self.deep_retrieval.clone(),
            second_opinion: self.second_opinion.clone(),
            memory_entries: None,
            budget_exhausted: false,
        })
    }

    fn run_probe(&self, probe: &Probe) -> Result<ProbeRunResult> {
        self.probes_run
            .lock()
            .expect("probes lock")
            .push(probe.name.clone());
        if self.fail_probes {
            return Err(anyhow!("probe runner crashed"));
        }
        Ok(probe_result(&probe.name, true))
    }
}

/// [`DecisionPolicy`] returning scripted decision types in order, repeating
/// the last one.
#[derive(Debug)]
pub struct ScriptedPolicy {
    script: Vec<DecisionType>,
    calls: Mutex<usize>,
}

impl ScriptedPolicy {
    pub fn new(script: Vec<DecisionType>) -> Self {
        assert!(!script.is_empty(), "script needs at least one decision");
        Self {
            script,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().expect("calls lock")
    }
}

impl DecisionPolicy for ScriptedPolicy {
    fn decide(&self, _evidence: &EvidenceBundle, _phase: &Phase) -> Decision {
        let mut calls = self.calls.lock().expect("calls lock");
        let idx = (*calls).min(self.script.len() - 1);
        *calls += 1;
        Decision::bare(self.script[idx], format!("scripted decision {}", *calls))
    }
}

/// [`PhaseHooks`] recording every side effect.
#[derive(Debug)]
pub struct RecordingHooks {
    phases: Vec<Phase>,
    health: HealthBudget,
    intention: Option<String>,
    replan_result: bool,
    fix_outcome: ActionOutcome,
    decisions: Mutex<Vec<DecisionAuditEntry>>,
    replans: Mutex<Vec<Vec<String>>>,
    state_updates: Mutex<Vec<(String, PhaseState)>>,
}

impl Default for RecordingHooks {
    fn default() -> Self {
        Self {
            phases: Vec::new(),
            health: HealthBudget::default(),
            intention: None,
            replan_result: true,
            fix_outcome: ActionOutcome::new(ActionTaken::FixExecuted, true),
            decisions: Mutex::new(Vec::new()),
            replans: Mutex::new(Vec::new()),
            state_updates: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn with_health(mut self, health: HealthBudget) -> Self {
        self.health = health;
        self
    }

    pub fn with_intention(mut self, summary: &str) -> Self {
        self.intention = Some(summary.to_string());
        self
    }

    pub fn with_replan_result(mut self, adopted: bool) -> Self {
        self.replan_result = adopted;
        self
    }

    pub fn with_fix_outcome(mut self, outcome: ActionOutcome) -> Self {
        self.fix_outcome = outcome;
        self
    }

    pub fn decisions(&self) -> Vec<DecisionAuditEntry> {
        self.decisions.lock().expect("decisions lock").clone()
    }

    /// Error histories passed to `revise_approach`.
    pub fn replans(&self) -> Vec<Vec<String>> {
        self.replans.lock().expect("replans lock").clone()
    }

    pub fn state_updates(&self) -> Vec<(String, PhaseState)> {
        self.state_updates.lock().expect("updates lock").clone()
    }
}

impl PhaseHooks for RecordingHooks {
    fn fetch_phase(&self, _run_id: &str, phase_id: &str) -> Result<Option<Phase>> {
        Ok(self.phases.iter().find(|p| p.id == phase_id).cloned())
    }

    fn update_phase_state(&self, _run_id: &str, phase_id: &str, state: PhaseState) -> Result<()> {
        self.state_updates
            .lock()
            .expect("updates lock")
            .push((phase_id.to_string(), state));
        Ok(())
    }

    fn record_decision(&self, entry: &DecisionAuditEntry) -> Result<()> {
        self.decisions.lock().expect("decisions lock").push(entry.clone());
        Ok(())
    }

    fn revise_approach(
        &self,
        _run_id: &str,
        _phase: &Phase,
        error_history: &[String],
    ) -> Result<bool> {
        self.replans
            .lock()
            .expect("replans lock")
            .push(error_history.to_vec());
        Ok(self.replan_result)
    }

    fn execute_fix(
        &self,
        _run_id: &str,
        _phase: &Phase,
        _response: &DoctorResponse,
    ) -> Result<ActionOutcome> {
        Ok(self.fix_outcome.clone())
    }

    fn health_budget(&self, _run_id: &str) -> HealthBudget {
        self.health
    }

    fn intention_summary(&self, _run_id: &str, _phase_id: &str) -> Option<String> {
        self.intention.clone()
    }
}
