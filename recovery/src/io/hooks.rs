//! Executor-owned persistence and side-effect hooks.
//!
//! The recovery core never stores phases itself. Everything it needs from the
//! executor (phase lookup, state updates, audit persistence, replanning and
//! fix execution) goes through [`PhaseHooks`].

use anyhow::Result;

use crate::core::doctor::{ActionOutcome, DecisionAuditEntry, DoctorResponse, HealthBudget};
use crate::core::types::{Phase, PhaseState};

pub trait PhaseHooks {
    /// Look up a phase by id.
    fn fetch_phase(&self, run_id: &str, phase_id: &str) -> Result<Option<Phase>>;

    fn update_phase_state(&self, run_id: &str, phase_id: &str, state: PhaseState) -> Result<()>;

    /// Persist a structured decision-audit entry.
    fn record_decision(&self, entry: &DecisionAuditEntry) -> Result<()>;

    /// Revise the phase approach given recent errors. Returns whether a new
    /// approach was adopted.
    fn revise_approach(&self, run_id: &str, phase: &Phase, error_history: &[String])
    -> Result<bool>;

    /// Carry out an `execute_fix` response.
    fn execute_fix(
        &self,
        run_id: &str,
        phase: &Phase,
        response: &DoctorResponse,
    ) -> Result<ActionOutcome>;

    /// Current run-wide failure quota.
    fn health_budget(&self, run_id: &str) -> HealthBudget;

    /// Intention-anchor summary for the run, if one exists.
    fn intention_summary(&self, run_id: &str, phase_id: &str) -> Option<String>;
}

impl<H: PhaseHooks + ?Sized> PhaseHooks for &H {
    fn fetch_phase(&self, run_id: &str, phase_id: &str) -> Result<Option<Phase>> {
        (**self).fetch_phase(run_id, phase_id)
    }

    fn update_phase_state(&self, run_id: &str, phase_id: &str, state: PhaseState) -> Result<()> {
        (**self).update_phase_state(run_id, phase_id, state)
    }

    fn record_decision(&self, entry: &DecisionAuditEntry) -> Result<()> {
        (**self).record_decision(entry)
    }

    fn revise_approach(
        &self,
        run_id: &str,
        phase: &Phase,
        error_history: &[String],
    ) -> Result<bool> {
        (**self).revise_approach(run_id, phase, error_history)
    }

    fn execute_fix(
        &self,
        run_id: &str,
        phase: &Phase,
        response: &DoctorResponse,
    ) -> Result<ActionOutcome> {
        (**self).execute_fix(run_id, phase, response)
    }

    fn health_budget(&self, run_id: &str) -> HealthBudget {
        (**self).health_budget(run_id)
    }

    fn intention_summary(&self, run_id: &str, phase_id: &str) -> Option<String> {
        (**self).intention_summary(run_id, phase_id)
    }
}
