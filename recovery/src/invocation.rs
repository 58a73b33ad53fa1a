//! Budget-gated Doctor invocation and action dispatch.
//!
//! One [`InvocationGate`] serves one run. Gates for concurrent runs share a
//! single [`DoctorState`] by reference.

use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::core::doctor::{
    ActionOutcome, ActionTaken, ContextSummary, DecisionAuditEntry, DoctorAction, DoctorLimits,
    DoctorRequest, DoctorResponse, GateInputs, INFRA_ERROR, InvocationVerdict, evaluate,
};
use crate::core::doctor_state::DoctorState;
use crate::core::types::{Phase, PhaseState, RunCheckpoint};
use crate::io::backend::DiagnosticBackend;
use crate::io::checkpoint::{CheckpointError, CheckpointManager};
use crate::io::git::GitPort;
use crate::io::hooks::PhaseHooks;

const DOCTOR_TRIGGER: &str = "doctor";
/// Error history entries handed to the replanner.
const REPLAN_HISTORY_LEN: usize = 5;

const KNOWN_ACTIONS: [DoctorAction; 6] = [
    DoctorAction::RetryWithFix,
    DoctorAction::Replan,
    DoctorAction::SkipPhase,
    DoctorAction::MarkFatal,
    DoctorAction::RollbackRun,
    DoctorAction::ExecuteFix,
];

pub struct InvocationGate<'s, B, H, G> {
    run_id: String,
    limits: DoctorLimits,
    state: &'s DoctorState,
    backend: B,
    hooks: H,
    checkpoints: CheckpointManager<G>,
}

impl<'s, B, H, G> InvocationGate<'s, B, H, G>
where
    B: DiagnosticBackend,
    H: PhaseHooks,
    G: GitPort,
{
    pub fn new(
        run_id: impl Into<String>,
        limits: DoctorLimits,
        state: &'s DoctorState,
        backend: B,
        hooks: H,
        checkpoints: CheckpointManager<G>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            limits,
            state,
            backend,
            hooks,
            checkpoints,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn checkpoints(&self) -> &CheckpointManager<G> {
        &self.checkpoints
    }

    /// Capture the workspace's current branch and commit as this run's home
    /// state, for later `rollback_run` actions.
    pub fn capture_run_checkpoint(&self) -> Result<RunCheckpoint, CheckpointError> {
        let checkpoint = self.checkpoints.create_run_checkpoint()?;
        self.state.set_run_checkpoint(&self.run_id, checkpoint.clone());
        Ok(checkpoint)
    }

    /// Whether a Doctor call is warranted now.
    pub fn should_invoke(
        &self,
        phase_id: &str,
        builder_attempts: u32,
        error_category: &str,
    ) -> bool {
        let max_builder_attempts = match self.hooks.fetch_phase(&self.run_id, phase_id) {
            Ok(phase) => phase.map_or(0, |p| p.max_builder_attempts),
            Err(err) => {
                warn!(
                    phase_id,
                    err = %format!("{err:#}"),
                    "phase lookup failed, assuming no attempt limit"
                );
                0
            }
        };
        self.verdict(phase_id, max_builder_attempts, builder_attempts, error_category)
            .should_invoke()
    }

    fn verdict(
        &self,
        phase_id: &str,
        max_builder_attempts: u32,
        builder_attempts: u32,
        error_category: &str,
    ) -> InvocationVerdict {
        let counts = self.state.counts(&self.run_id, phase_id);
        let verdict = evaluate(
            &self.limits,
            &GateInputs {
                builder_attempts,
                error_category,
                max_builder_attempts,
                phase_calls: counts.phase_calls,
                run_calls: counts.run_calls,
                infra_calls: counts.infra_calls,
                health: self.hooks.health_budget(&self.run_id),
            },
        );
        match verdict {
            InvocationVerdict::Skip(reason) => {
                debug!(phase_id, %reason, "doctor call skipped");
            }
            InvocationVerdict::InvokeNearBudget { utilization } => {
                info!(
                    phase_id,
                    utilization,
                    "health budget nearly exhausted, invoking doctor early"
                );
            }
            InvocationVerdict::Invoke => {}
        }
        verdict
    }

    /// Record `error_category` for the phase and summarize its history.
    pub fn build_context(&self, phase_id: &str, error_category: &str) -> ContextSummary {
        self.state.build_context(&self.run_id, phase_id, error_category)
    }

    /// Ask the Doctor to diagnose a failure.
    ///
    /// Returns `None` when the policy declines the call or the backend
    /// fails; backend errors are logged, never propagated.
    #[instrument(
        skip_all,
        fields(
            run_id = %self.run_id,
            phase_id = %phase.id,
            error_category = %error_category,
            builder_attempts = builder_attempts
        )
    )]
    pub fn invoke(
        &self,
        phase: &Phase,
        error_category: &str,
        builder_attempts: u32,
        last_patch: Option<&str>,
        patch_errors: &[String],
        logs_excerpt: &str,
    ) -> Option<DoctorResponse> {
        let verdict = self.verdict(
            &phase.id,
            phase.max_builder_attempts,
            builder_attempts,
            error_category,
        );
        if !verdict.should_invoke() {
            return None;
        }
        let is_infra = error_category == INFRA_ERROR;
        let reservation = match self
            .state
            .try_reserve(&self.limits, &self.run_id, &phase.id, is_infra)
        {
            Ok(reservation) => reservation,
            Err(reason) => {
                debug!(%reason, "doctor call lost the race for a slot");
                return None;
            }
        };

        let context = self.build_context(&phase.id, error_category);
        let request = DoctorRequest {
            run_id: self.run_id.clone(),
            phase_id: phase.id.clone(),
            error_category: error_category.to_string(),
            builder_attempts,
            last_patch: last_patch.map(str::to_string),
            patch_errors: patch_errors.to_vec(),
            logs_excerpt: self.logs_with_intention(&phase.id, logs_excerpt),
            health_budget: self.hooks.health_budget(&self.run_id),
        };
        let strong_calls = self.state.counts(&self.run_id, &phase.id).strong_calls;
        let allow_escalation = strong_calls < self.limits.max_strong_calls_per_run;

        match self
            .backend
            .execute_doctor(&request, &context, allow_escalation)
        {
            Ok(response) => {
                info!(
                    action = %response.action,
                    confidence = response.confidence,
                    model_tier = ?response.model_tier,
                    "doctor responded"
                );
                if !response.disable_providers.is_empty() {
                    warn!(
                        providers = ?response.disable_providers,
                        "doctor recommends disabling providers"
                    );
                }
                self.state.record_response(reservation, &response);
                Some(response)
            }
            Err(err) => {
                self.state.release(reservation);
                error!(
                    err = %format!("{err:#}"),
                    "doctor call failed, falling back to default retry"
                );
                None
            }
        }
    }

    fn logs_with_intention(&self, phase_id: &str, logs_excerpt: &str) -> String {
        if !self.limits.intention_context {
            return logs_excerpt.to_string();
        }
        match self.hooks.intention_summary(&self.run_id, phase_id) {
            Some(summary) if !summary.trim().is_empty() => {
                format!("[Intention]\n{}\n\n{logs_excerpt}", summary.trim())
            }
            _ => logs_excerpt.to_string(),
        }
    }

    /// Pending builder hint for the phase's next attempt.
    pub fn take_builder_hint(&self, phase_id: &str) -> Option<String> {
        self.state.take_builder_hint(&self.run_id, phase_id)
    }

    /// Carry out a Doctor response.
    #[instrument(
        skip_all,
        fields(
            run_id = %self.run_id,
            phase_id = %phase.id,
            action = %response.action,
            attempt_index = attempt_index
        )
    )]
    pub fn handle_action(
        &self,
        phase: &Phase,
        response: &DoctorResponse,
        attempt_index: u32,
        error_history: &[String],
    ) -> ActionOutcome {
        let outcome = match &response.action {
            DoctorAction::RetryWithFix => {
                if let Some(hint) = response
                    .builder_hint
                    .as_deref()
                    .filter(|h| !h.trim().is_empty())
                {
                    self.state.set_builder_hint(&self.run_id, &phase.id, hint);
                }
                ActionOutcome::new(ActionTaken::RetryWithHint, true)
            }
            DoctorAction::Replan => {
                let start = error_history.len().saturating_sub(REPLAN_HISTORY_LEN);
                match self
                    .hooks
                    .revise_approach(&self.run_id, phase, &error_history[start..])
                {
                    Ok(true) => ActionOutcome::new(ActionTaken::Replanned, true),
                    Ok(false) => {
                        warn!("replan produced no new approach");
                        ActionOutcome::new(ActionTaken::ReplanFailed, true)
                    }
                    Err(err) => {
                        warn!(err = %format!("{err:#}"), "replan failed");
                        ActionOutcome::new(ActionTaken::ReplanFailed, true)
                    }
                }
            }
            DoctorAction::SkipPhase => {
                self.mark_failed(phase);
                self.state.mark_skipped(&self.run_id, &phase.id);
                self.audit(&phase.id, "skip_phase", json!({ "rationale": response.rationale }));
                ActionOutcome::new(ActionTaken::PhaseSkipped, false)
            }
            DoctorAction::MarkFatal => {
                error!(
                    severity = "critical",
                    rationale = %response.rationale,
                    "doctor marked phase fatal"
                );
                self.mark_failed(phase);
                self.audit(&phase.id, "mark_fatal", json!({ "rationale": response.rationale }));
                ActionOutcome::new(ActionTaken::MarkedFatal, false)
            }
            DoctorAction::RollbackRun => self.rollback_run(phase, response),
            DoctorAction::ExecuteFix => self.execute_fix(phase, response),
            DoctorAction::Unknown(raw) => {
                warn!(action = %raw, "unknown doctor action, treating as retry");
                ActionOutcome::new(ActionTaken::UnknownActionRetry(raw.clone()), true)
            }
        };

        let entry = DecisionAuditEntry {
            trigger: DOCTOR_TRIGGER.to_string(),
            run_id: self.run_id.clone(),
            phase_id: phase.id.clone(),
            choice: response.action.to_string(),
            rationale: response.rationale.clone(),
            alternatives: KNOWN_ACTIONS
                .iter()
                .filter(|a| **a != response.action)
                .map(ToString::to_string)
                .collect(),
            confidence: response.confidence,
        };
        if let Err(err) = self.hooks.record_decision(&entry) {
            warn!(err = %format!("{err:#}"), "failed to record decision audit entry");
        }
        info!(
            action_taken = %outcome.action_taken,
            continue_retrying = outcome.continue_retrying,
            "doctor action handled"
        );
        outcome
    }

    fn rollback_run(&self, phase: &Phase, response: &DoctorResponse) -> ActionOutcome {
        let checkpoint = self.state.run_checkpoint(&self.run_id).unwrap_or(RunCheckpoint {
            branch: String::new(),
            commit: String::new(),
        });
        let result = self.checkpoints.rollback_to_run_checkpoint(
            &checkpoint.branch,
            &checkpoint.commit,
            &response.rationale,
        );
        // The phase fails whether or not the workspace could be restored.
        self.mark_failed(phase);
        let taken = match &result {
            Ok(()) => ActionTaken::RolledBack,
            Err(err) => {
                warn!(
                    code = err.code(),
                    err = %err,
                    "rollback failed, workspace may be inconsistent"
                );
                ActionTaken::RollbackFailed
            }
        };
        self.audit(
            &phase.id,
            "rollback_run",
            json!({
                "reason": response.rationale,
                "branch": checkpoint.branch,
                "commit": checkpoint.commit,
                "ok": result.is_ok(),
                "error": result.as_ref().err().map(CheckpointError::code),
            }),
        );
        ActionOutcome::new(taken, false)
    }

    fn execute_fix(&self, phase: &Phase, response: &DoctorResponse) -> ActionOutcome {
        if !self.checkpoints.create_execute_fix_checkpoint(&phase.id) {
            warn!("could not checkpoint before execute_fix, not running the fix");
            return ActionOutcome::new(ActionTaken::FixFailed, true);
        }
        match self.hooks.execute_fix(&self.run_id, phase, response) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "execute_fix handler failed");
                ActionOutcome::new(ActionTaken::FixFailed, true)
            }
        }
    }

    fn mark_failed(&self, phase: &Phase) {
        if let Err(err) = self
            .hooks
            .update_phase_state(&self.run_id, &phase.id, PhaseState::Failed)
        {
            warn!(err = %format!("{err:#}"), "failed to mark phase failed");
        }
    }

    fn audit(&self, phase_id: &str, action: &str, details: serde_json::Value) {
        if !self
            .checkpoints
            .write_audit_log(&self.run_id, phase_id, action, &details)
        {
            debug!(action, "audit log entry not written");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::core::doctor::{HealthBudget, ModelTier};
    use crate::io::git::GitOutput;
    use crate::test_support::{RecordingGit, RecordingHooks, ScriptedBackend};

    fn phase(id: &str) -> Phase {
        Phase {
            id: id.to_string(),
            ..Phase::default()
        }
    }

    fn gate<'s>(
        state: &'s DoctorState,
        backend: &'s ScriptedBackend,
        hooks: &'s RecordingHooks,
        git: &'s RecordingGit,
        workspace: &Path,
    ) -> InvocationGate<'s, &'s ScriptedBackend, &'s RecordingHooks, &'s RecordingGit> {
        InvocationGate::new(
            "run-1",
            DoctorLimits::default(),
            state,
            backend,
            hooks,
            CheckpointManager::new(git, workspace, ".autonomous_runs"),
        )
    }

    fn retry() -> DoctorResponse {
        DoctorResponse::new(DoctorAction::RetryWithFix, 0.8, "fix the import")
    }

    #[test]
    fn minimum_attempts_blocks_generic_failures() {
        let (state, backend, hooks, git) = (
            DoctorState::new(),
            ScriptedBackend::new(),
            RecordingHooks::new(),
            RecordingGit::new(),
        );
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        assert!(!gate.should_invoke("p1", 0, "generic_failure"));
        assert!(gate.should_invoke("p1", 2, "generic_failure"));
        assert!(gate.should_invoke("p1", 0, INFRA_ERROR));
    }

    #[test]
    fn deliverables_failure_uses_phase_attempt_limit() {
        let (state, backend, git) = (
            DoctorState::new(),
            ScriptedBackend::new(),
            RecordingGit::new(),
        );
        let hooks = RecordingHooks::new().with_phase(Phase {
            max_builder_attempts: 5,
            ..phase("p1")
        });
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        assert!(!gate.should_invoke("p1", 3, "deliverables_validation_failed"));
        assert!(gate.should_invoke("p1", 5, "deliverables_validation_failed"));
    }

    #[test]
    fn invoke_counts_calls_and_stops_at_phase_cap() {
        let (state, hooks, git) = (DoctorState::new(), RecordingHooks::new(), RecordingGit::new());
        let backend = ScriptedBackend::new().respond(retry()).respond(retry()).respond(retry());
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        let p = phase("p1");
        assert!(gate.invoke(&p, "ci_fail", 2, None, &[], "log").is_some());
        assert!(gate.invoke(&p, "ci_fail", 3, None, &[], "log").is_some());
        assert!(gate.invoke(&p, "ci_fail", 4, None, &[], "log").is_none());
        assert_eq!(backend.requests().len(), 2);
        assert_eq!(state.counts("run-1", "p1").phase_calls, 2);
        assert!(!gate.should_invoke("p1", 5, "ci_fail"));
    }

    #[test]
    fn backend_failure_returns_none_and_frees_the_slot() {
        let (state, hooks, git) = (DoctorState::new(), RecordingHooks::new(), RecordingGit::new());
        let backend = ScriptedBackend::new().fail("network down").respond(retry());
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        let p = phase("p1");
        assert!(gate.invoke(&p, "ci_fail", 2, None, &[], "log").is_none());
        assert_eq!(state.counts("run-1", "p1").run_calls, 0);
        assert!(gate.invoke(&p, "ci_fail", 2, None, &[], "log").is_some());
        assert_eq!(state.counts("run-1", "p1").run_calls, 1);
    }

    #[test]
    fn request_carries_health_budget_and_intention() {
        let (state, git) = (DoctorState::new(), RecordingGit::new());
        let hooks = RecordingHooks::new()
            .with_health(HealthBudget { failures: 3, limit: 10 })
            .with_intention("Ship the importer");
        let backend = ScriptedBackend::new().respond(retry());
        let limits = DoctorLimits {
            intention_context: true,
            ..DoctorLimits::default()
        };
        let gate = InvocationGate::new(
            "run-1",
            limits,
            &state,
            &backend,
            &hooks,
            CheckpointManager::new(&git, "/ws", ".autonomous_runs"),
        );
        gate.invoke(&phase("p1"), "ci_fail", 2, Some("diff"), &["e1".to_string()], "trace")
            .expect("response");
        let (request, _, allow_escalation) = backend.requests().remove(0);
        assert_eq!(request.health_budget, HealthBudget { failures: 3, limit: 10 });
        assert_eq!(request.logs_excerpt, "[Intention]\nShip the importer\n\ntrace");
        assert_eq!(request.last_patch.as_deref(), Some("diff"));
        assert!(allow_escalation);
    }

    #[test]
    fn escalation_is_disallowed_once_strong_budget_is_spent() {
        let (state, hooks, git) = (DoctorState::new(), RecordingHooks::new(), RecordingGit::new());
        let mut strong = retry();
        strong.model_tier = ModelTier::Strong;
        let backend = ScriptedBackend::new().respond(strong).respond(retry());
        let limits = DoctorLimits {
            max_strong_calls_per_run: 1,
            ..DoctorLimits::default()
        };
        let gate = InvocationGate::new(
            "run-1",
            limits,
            &state,
            &backend,
            &hooks,
            CheckpointManager::new(&git, "/ws", ".autonomous_runs"),
        );
        gate.invoke(&phase("p1"), "ci_fail", 2, None, &[], "").expect("first");
        gate.invoke(&phase("p2"), "ci_fail", 2, None, &[], "").expect("second");
        let requests = backend.requests();
        assert!(requests[0].2);
        assert!(!requests[1].2);
    }

    #[test]
    fn retry_with_fix_stores_hint() {
        let (state, backend, hooks, git) = (
            DoctorState::new(),
            ScriptedBackend::new(),
            RecordingHooks::new(),
            RecordingGit::new(),
        );
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        let mut response = retry();
        response.builder_hint = Some("from pkg import Foo".to_string());
        let outcome = gate.handle_action(&phase("p1"), &response, 1, &[]);
        assert_eq!(outcome, ActionOutcome::new(ActionTaken::RetryWithHint, true));
        assert_eq!(gate.take_builder_hint("p1").as_deref(), Some("from pkg import Foo"));
        let decisions = hooks.decisions();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].trigger, "doctor");
        assert_eq!(decisions[0].choice, "retry_with_fix");
        assert_eq!(decisions[0].alternatives.len(), 5);
    }

    #[test]
    fn replan_continues_even_when_revision_fails() {
        let (state, backend, git) = (
            DoctorState::new(),
            ScriptedBackend::new(),
            RecordingGit::new(),
        );
        let hooks = RecordingHooks::new().with_replan_result(false);
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        let history: Vec<String> = (0..8).map(|i| format!("err {i}")).collect();
        let response = DoctorResponse::new(DoctorAction::Replan, 0.5, "wrong approach");
        let outcome = gate.handle_action(&phase("p1"), &response, 2, &history);
        assert_eq!(outcome, ActionOutcome::new(ActionTaken::ReplanFailed, true));
        assert_eq!(hooks.replans()[0].len(), 5);
        assert_eq!(hooks.replans()[0][0], "err 3");
    }

    #[test]
    fn skip_and_fatal_fail_the_phase_and_stop() {
        let (state, backend, hooks, git) = (
            DoctorState::new(),
            ScriptedBackend::new(),
            RecordingHooks::new(),
            RecordingGit::new(),
        );
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        let skip = DoctorResponse::new(DoctorAction::SkipPhase, 0.9, "blocked upstream");
        assert_eq!(
            gate.handle_action(&phase("p1"), &skip, 1, &[]),
            ActionOutcome::new(ActionTaken::PhaseSkipped, false)
        );
        assert!(state.is_skipped("run-1", "p1"));

        let fatal = DoctorResponse::new(DoctorAction::MarkFatal, 0.9, "corrupt repo");
        assert_eq!(
            gate.handle_action(&phase("p2"), &fatal, 1, &[]),
            ActionOutcome::new(ActionTaken::MarkedFatal, false)
        );
        assert_eq!(
            hooks.state_updates(),
            vec![
                ("p1".to_string(), PhaseState::Failed),
                ("p2".to_string(), PhaseState::Failed),
            ]
        );
    }

    #[test]
    fn rollback_without_run_checkpoint_still_fails_phase() {
        let (state, backend, hooks, git) = (
            DoctorState::new(),
            ScriptedBackend::new(),
            RecordingHooks::new(),
            RecordingGit::new(),
        );
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        let rollback = DoctorResponse::new(DoctorAction::RollbackRun, 0.9, "tree damaged");
        let outcome = gate.handle_action(&phase("p1"), &rollback, 1, &[]);
        assert_eq!(outcome, ActionOutcome::new(ActionTaken::RollbackFailed, false));
        assert!(git.calls().is_empty());
        assert_eq!(hooks.state_updates(), vec![("p1".to_string(), PhaseState::Failed)]);
    }

    #[test]
    fn rollback_uses_registered_run_checkpoint() {
        let git = RecordingGit::new()
            .respond(GitOutput {
                stdout: "main\n".to_string(),
                exit_code: Some(0),
                ..GitOutput::default()
            })
            .respond(GitOutput {
                stdout: "abc123\n".to_string(),
                exit_code: Some(0),
                ..GitOutput::default()
            });
        let (state, backend, hooks) = (
            DoctorState::new(),
            ScriptedBackend::new(),
            RecordingHooks::new(),
        );
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        let home = gate.capture_run_checkpoint().expect("checkpoint");
        assert_eq!(home.commit, "abc123");

        let rollback = DoctorResponse::new(DoctorAction::RollbackRun, 0.9, "tree damaged");
        let outcome = gate.handle_action(&phase("p1"), &rollback, 1, &[]);
        assert_eq!(outcome, ActionOutcome::new(ActionTaken::RolledBack, false));
        let calls = git.calls();
        assert_eq!(calls[2], vec!["reset", "--hard", "abc123"]);
        assert_eq!(calls[3], vec!["clean", "-fd"]);
        assert_eq!(calls[4], vec!["checkout", "main"]);
        let audit = std::fs::read_to_string(
            temp.path().join(".autonomous_runs/run-1/checkpoint_audit.log"),
        )
        .expect("audit log");
        assert!(audit.contains("\"action\":\"rollback_run\""));
    }

    #[test]
    fn execute_fix_returns_handler_outcome_after_checkpoint() {
        let (state, backend, git) = (
            DoctorState::new(),
            ScriptedBackend::new(),
            RecordingGit::new(),
        );
        let hooks = RecordingHooks::new()
            .with_fix_outcome(ActionOutcome::new(ActionTaken::FixExecuted, false));
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        let fix = DoctorResponse::new(DoctorAction::ExecuteFix, 0.9, "reinstall deps");
        assert_eq!(
            gate.handle_action(&phase("p1"), &fix, 1, &[]),
            ActionOutcome::new(ActionTaken::FixExecuted, false)
        );
        let calls = git.calls();
        assert_eq!(calls[0], vec!["add", "-A"]);
        assert_eq!(calls[1][0], "commit");
    }

    #[test]
    fn unknown_action_is_a_retry() {
        let (state, backend, hooks, git) = (
            DoctorState::new(),
            ScriptedBackend::new(),
            RecordingHooks::new(),
            RecordingGit::new(),
        );
        let temp = tempfile::tempdir().expect("tempdir");
        let gate = gate(&state, &backend, &hooks, &git, temp.path());
        let odd = DoctorResponse::new(DoctorAction::from("reticulate_splines"), 0.3, "?");
        assert_eq!(
            gate.handle_action(&phase("p1"), &odd, 1, &[]),
            ActionOutcome::new(
                ActionTaken::UnknownActionRetry("reticulate_splines".to_string()),
                true
            )
        );
        assert_eq!(hooks.decisions()[0].alternatives.len(), 6);
    }
}
