//! In-memory Doctor bookkeeping shared by every invocation in one process.
//!
//! Counters live behind a single mutex keyed by `(run_id, phase_id)`. The
//! state is not persisted and is not shared between processes; a
//! multi-process deployment has to move these counters to an external store.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::doctor::{
    ContextSummary, DoctorLimits, DoctorResponse, ModelTier, SkipReason, limit_reached,
};
use crate::core::types::RunCheckpoint;

/// Snapshot of the counters relevant to one `(run, phase)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub phase_calls: u32,
    pub run_calls: u32,
    pub infra_calls: u32,
    pub strong_calls: u32,
}

/// Proof that call slots were reserved; hand it back with [`DoctorState::release`]
/// if the call does not go through.
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    run_id: String,
    phase_id: String,
    infra: bool,
}

#[derive(Debug, Default)]
struct PhaseRecord {
    calls: u32,
    error_categories: BTreeSet<String>,
    last_response: Option<DoctorResponse>,
    builder_hint: Option<String>,
}

#[derive(Debug, Default)]
struct RunRecord {
    calls: u32,
    strong_calls: u32,
    infra_calls: u32,
    skipped_phases: BTreeSet<String>,
    checkpoint: Option<RunCheckpoint>,
}

#[derive(Debug, Default)]
struct Inner {
    phases: HashMap<(String, String), PhaseRecord>,
    runs: HashMap<String, RunRecord>,
}

impl Inner {
    fn phase(&mut self, run_id: &str, phase_id: &str) -> &mut PhaseRecord {
        self.phases
            .entry((run_id.to_string(), phase_id.to_string()))
            .or_default()
    }

    fn run(&mut self, run_id: &str) -> &mut RunRecord {
        self.runs.entry(run_id.to_string()).or_default()
    }
}

#[derive(Debug, Default)]
pub struct DoctorState {
    inner: Mutex<Inner>,
}

impl DoctorState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Counter updates are single statements, so a poisoned lock still holds
        // consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn counts(&self, run_id: &str, phase_id: &str) -> CallCounts {
        let inner = self.lock();
        let phase_calls = inner
            .phases
            .get(&(run_id.to_string(), phase_id.to_string()))
            .map_or(0, |p| p.calls);
        let run = inner.runs.get(run_id);
        CallCounts {
            phase_calls,
            run_calls: run.map_or(0, |r| r.calls),
            infra_calls: run.map_or(0, |r| r.infra_calls),
            strong_calls: run.map_or(0, |r| r.strong_calls),
        }
    }

    /// Record `error_category` for the phase and summarize what is known so far.
    pub fn build_context(
        &self,
        run_id: &str,
        phase_id: &str,
        error_category: &str,
    ) -> ContextSummary {
        let mut inner = self.lock();
        let record = inner.phase(run_id, phase_id);
        if !error_category.is_empty() {
            record.error_categories.insert(error_category.to_string());
        }
        ContextSummary {
            distinct_error_categories: record.error_categories.iter().cloned().collect(),
            prior_action: record.last_response.as_ref().map(|r| r.action.clone()),
            prior_confidence: record.last_response.as_ref().map(|r| r.confidence),
            doctor_calls_for_phase: record.calls,
        }
    }

    /// Atomically check the call caps and take one phase/run (and infra) slot.
    pub fn try_reserve(
        &self,
        limits: &DoctorLimits,
        run_id: &str,
        phase_id: &str,
        infra: bool,
    ) -> Result<Reservation, SkipReason> {
        let mut inner = self.lock();
        let phase_calls = inner.phase(run_id, phase_id).calls;
        let run = inner.run(run_id);
        if let Some(reason) =
            limit_reached(limits, infra, phase_calls, run.calls, run.infra_calls)
        {
            return Err(reason);
        }
        run.calls += 1;
        if infra {
            run.infra_calls += 1;
        }
        inner.phase(run_id, phase_id).calls += 1;
        Ok(Reservation {
            run_id: run_id.to_string(),
            phase_id: phase_id.to_string(),
            infra,
        })
    }

    /// Give back slots taken by a call that did not complete.
    pub fn release(&self, reservation: Reservation) {
        let mut inner = self.lock();
        let run = inner.run(&reservation.run_id);
        run.calls = run.calls.saturating_sub(1);
        if reservation.infra {
            run.infra_calls = run.infra_calls.saturating_sub(1);
        }
        let phase = inner.phase(&reservation.run_id, &reservation.phase_id);
        phase.calls = phase.calls.saturating_sub(1);
    }

    /// Store a successful response against a reservation.
    pub fn record_response(&self, reservation: Reservation, response: &DoctorResponse) {
        let mut inner = self.lock();
        if response.model_tier == ModelTier::Strong {
            inner.run(&reservation.run_id).strong_calls += 1;
        }
        let record = inner.phase(&reservation.run_id, &reservation.phase_id);
        if let Some(hint) = response.builder_hint.as_ref().filter(|h| !h.trim().is_empty()) {
            record.builder_hint = Some(hint.clone());
        }
        record.last_response = Some(response.clone());
    }

    pub fn set_builder_hint(&self, run_id: &str, phase_id: &str, hint: &str) {
        self.lock().phase(run_id, phase_id).builder_hint = Some(hint.to_string());
    }

    /// Remove and return the pending builder hint, for the next builder attempt.
    pub fn take_builder_hint(&self, run_id: &str, phase_id: &str) -> Option<String> {
        self.lock().phase(run_id, phase_id).builder_hint.take()
    }

    pub fn mark_skipped(&self, run_id: &str, phase_id: &str) {
        self.lock()
            .run(run_id)
            .skipped_phases
            .insert(phase_id.to_string());
    }

    pub fn is_skipped(&self, run_id: &str, phase_id: &str) -> bool {
        self.lock()
            .runs
            .get(run_id)
            .is_some_and(|r| r.skipped_phases.contains(phase_id))
    }

    pub fn skipped_phases(&self, run_id: &str) -> Vec<String> {
        self.lock()
            .runs
            .get(run_id)
            .map(|r| r.skipped_phases.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remember the run's home checkpoint for `rollback_run`.
    pub fn set_run_checkpoint(&self, run_id: &str, checkpoint: RunCheckpoint) {
        self.lock().run(run_id).checkpoint = Some(checkpoint);
    }

    pub fn run_checkpoint(&self, run_id: &str) -> Option<RunCheckpoint> {
        self.lock()
            .runs
            .get(run_id)
            .and_then(|r| r.checkpoint.clone())
    }
}
