//! Bounded multi-round evidence gathering.
//!
//! Round 1 runs the baseline diagnostics. Each later round analyzes what the
//! evidence is still missing, runs at most `max_probes_per_round` targeted
//! probes and re-classifies. The loop ends on the first terminal decision,
//! when no gaps remain, or after `max_rounds`.

use std::time::Instant;

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::decision::DecisionPolicy;
use crate::core::evidence::{
    DEEP_RETRIEVAL_KEY, EvidenceBundle, INITIAL_DIAGNOSTICS_KEY, MEMORY_ENTRIES_KEY,
    SECOND_OPINION_KEY, probe_entry, round_key,
};
use crate::core::gaps::{analyze_gaps, gaps_to_probes};
use crate::core::types::{
    Decision, DecisionType, EvidenceGap, FailureContext, InvestigationResult, Phase, ProbeRunResult,
};
use crate::io::config::InvestigationConfig;
use crate::io::probes::{DiagnosticsOutcome, ProbeRunner};

/// Questions attached whenever the loop gives up without a verdict.
pub const ESCALATION_QUESTIONS: [&str; 3] = [
    "What is the root cause of this failure?",
    "Which approach should the Builder take to fix it?",
    "Should this phase be retried, replanned, or skipped?",
];

pub struct InvestigationLoop<P, D> {
    runner: P,
    policy: D,
    config: InvestigationConfig,
}

/// Mutable state of one investigation.
struct Progress {
    evidence: EvidenceBundle,
    probes_executed: Vec<ProbeRunResult>,
    timeline: Vec<String>,
    gaps_identified: Vec<EvidenceGap>,
    started: Instant,
}

impl Progress {
    fn new(failure: &FailureContext) -> Self {
        Self {
            evidence: EvidenceBundle::with_failure_context(failure),
            probes_executed: Vec::new(),
            timeline: Vec::new(),
            gaps_identified: Vec::new(),
            started: Instant::now(),
        }
    }

    fn note(&mut self, entry: String) {
        debug!(entry = %entry, "investigation timeline");
        self.timeline.push(entry);
    }

    fn finish(self, decision: Decision, rounds: u32) -> InvestigationResult {
        InvestigationResult {
            decision,
            evidence: self.evidence,
            rounds,
            probes_executed: self.probes_executed,
            timeline: self.timeline,
            duration: self.started.elapsed(),
            gaps_identified: self.gaps_identified,
        }
    }
}

impl<P, D> InvestigationLoop<P, D>
where
    P: ProbeRunner,
    D: DecisionPolicy,
{
    pub fn new(runner: P, policy: D, config: InvestigationConfig) -> Self {
        Self {
            runner,
            policy,
            config,
        }
    }

    /// Investigate a failure until a terminal decision or the round cap.
    ///
    /// Probe and diagnostics errors are recorded in the timeline; the
    /// investigation itself never fails.
    #[instrument(skip_all, fields(phase_id = %phase.id, failure_class = %failure.failure_class))]
    pub fn investigate(&self, failure: &FailureContext, phase: &Phase) -> InvestigationResult {
        let max_rounds = self.config.max_rounds.max(1);
        let mut progress = Progress::new(failure);

        progress.note("Round 1: running baseline diagnostics".to_string());
        match self.runner.run_diagnostics(failure, phase) {
            Ok(outcome) => self.merge_diagnostics(&mut progress, outcome),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "baseline diagnostics failed");
                progress.note(format!("Round 1: diagnostics failed: {err:#}"));
            }
        }
        let decision = self.policy.decide(&progress.evidence, phase);
        progress.note(format!("Round 1: decision {}", decision.decision_type));
        if decision.is_terminal() {
            info!(round = 1, decision = %decision.decision_type, "investigation resolved");
            return progress.finish(decision, 1);
        }

        for round in 2..=max_rounds {
            let gaps = analyze_gaps(&progress.evidence, failure, phase);
            progress.note(format!("Round {round}: {} evidence gaps identified", gaps.len()));
            if gaps.is_empty() {
                info!(round, "no evidence gaps left, escalating");
                let decision = escalation(format!(
                    "No further evidence gaps after {round} rounds; the failure needs human review."
                ));
                progress.note(format!("Round {round}: escalated as {}", decision.decision_type));
                return progress.finish(decision, round);
            }

            let probes = gaps_to_probes(&gaps, phase, self.config.max_probes_per_round);
            progress.gaps_identified.extend(gaps);
            let names: Vec<&str> = probes.iter().map(|p| p.name.as_str()).collect();
            progress.note(format!(
                "Round {round}: running {} probes ({})",
                probes.len(),
                names.join(", ")
            ));
            for probe in &probes {
                match self.runner.run_probe(probe) {
                    Ok(result) => {
                        progress.evidence.insert(
                            round_key(round, &result.probe_name),
                            probe_entry(&result, self.config.preview_chars),
                        );
                        progress.probes_executed.push(result);
                    }
                    Err(err) => {
                        warn!(
                            round,
                            probe = %probe.name,
                            err = %format!("{err:#}"),
                            "probe failed"
                        );
                        progress.note(format!(
                            "Round {round}: probe {} failed: {err:#}",
                            probe.name
                        ));
                    }
                }
            }

            let decision = self.policy.decide(&progress.evidence, phase);
            progress.note(format!("Round {round}: decision {}", decision.decision_type));
            if decision.is_terminal() {
                info!(round, decision = %decision.decision_type, "investigation resolved");
                return progress.finish(decision, round);
            }
        }

        warn!(max_rounds, "investigation exhausted its rounds");
        let decision = escalation(format!(
            "Investigation exhausted {max_rounds} rounds without a clear decision \
             ({} probes executed, {} gaps identified).",
            progress.probes_executed.len(),
            progress.gaps_identified.len()
        ));
        progress.note(format!("Round {max_rounds}: max rounds reached, escalated"));
        progress.finish(decision, max_rounds)
    }

    fn merge_diagnostics(&self, progress: &mut Progress, outcome: DiagnosticsOutcome) {
        let probes: Vec<_> = outcome
            .probe_results
            .iter()
            .map(|result| probe_entry(result, self.config.preview_chars))
            .collect();
        progress.evidence.insert(
            INITIAL_DIAGNOSTICS_KEY,
            json!({
                "probe_count": outcome.probe_results.len(),
                "probes": probes,
                "budget_exhausted": outcome.budget_exhausted,
            }),
        );
        let enrichments = [
            (DEEP_RETRIEVAL_KEY, outcome.deep_retrieval),
            (SECOND_OPINION_KEY, outcome.second_opinion),
            (MEMORY_ENTRIES_KEY, outcome.memory_entries),
        ];
        for (key, value) in enrichments {
            if let Some(value) = value {
                progress.evidence.insert(key, value);
            }
        }
        progress.note(format!(
            "Round 1: {} baseline probes executed{}",
            outcome.probe_results.len(),
            if outcome.budget_exhausted {
                " (time budget exhausted)"
            } else {
                ""
            }
        ));
        progress.probes_executed.extend(outcome.probe_results);
    }
}

fn escalation(rationale: String) -> Decision {
    let mut decision = Decision::bare(DecisionType::Ambiguous, rationale);
    decision.questions_for_human = ESCALATION_QUESTIONS.iter().map(ToString::to_string).collect();
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gaps::{VERBOSE_TESTS_PROBE, WORKSPACE_STATUS_PROBE};
    use crate::test_support::{ScriptedPolicy, ScriptedProbeRunner, probe_result};

    fn failure(class: &str, message: &str) -> FailureContext {
        FailureContext {
            failure_class: class.to_string(),
            error_message: message.to_string(),
            ..FailureContext::default()
        }
    }

    fn phase() -> Phase {
        Phase {
            id: "p1".to_string(),
            ..Phase::default()
        }
    }

    fn config(max_rounds: u32, max_probes_per_round: usize) -> InvestigationConfig {
        InvestigationConfig {
            max_rounds,
            max_probes_per_round,
            ..InvestigationConfig::default()
        }
    }

    #[test]
    fn terminal_first_round_returns_immediately() {
        let runner =
            ScriptedProbeRunner::new().with_baseline(vec![probe_result("workspace_status", true)]);
        let policy = ScriptedPolicy::new(vec![DecisionType::Risky]);
        let result = InvestigationLoop::new(&runner, &policy, config(5, 3))
            .investigate(&failure("ci_fail", "x"), &phase());
        assert_eq!(result.rounds, 1);
        assert_eq!(result.decision.decision_type, DecisionType::Risky);
        assert!(runner.probes_run().is_empty());
        assert_eq!(result.probes_executed.len(), 1);
        let diag = result.evidence.get(INITIAL_DIAGNOSTICS_KEY).expect("diagnostics");
        assert_eq!(diag["probe_count"], 1);
    }

    #[test]
    fn enrichments_are_merged_into_evidence() {
        let runner = ScriptedProbeRunner::new()
            .with_deep_retrieval(json!({"snippets": ["a"]}))
            .with_second_opinion(json!({"verdict": "flaky"}));
        let policy = ScriptedPolicy::new(vec![DecisionType::ClearFix]);
        let result = InvestigationLoop::new(&runner, &policy, config(5, 3))
            .investigate(&failure("ci_fail", "x"), &phase());
        assert_eq!(result.evidence.get(DEEP_RETRIEVAL_KEY), Some(&json!({"snippets": ["a"]})));
        assert_eq!(result.evidence.get(SECOND_OPINION_KEY), Some(&json!({"verdict": "flaky"})));
        assert!(!result.evidence.contains_key(MEMORY_ENTRIES_KEY));
    }

    #[test]
    fn stops_when_no_gaps_remain() {
        let runner = ScriptedProbeRunner::new();
        let policy = ScriptedPolicy::new(vec![DecisionType::NeedMoreEvidence]);
        let long = "RuntimeError: the build produced an unexpected artifact layout in dist/";
        let result = InvestigationLoop::new(&runner, &policy, config(5, 3))
            .investigate(&failure("generic_failure", long), &phase());
        assert_eq!(result.rounds, 2);
        assert_eq!(result.decision.decision_type, DecisionType::Ambiguous);
        assert!(result.decision.rationale.contains("2 rounds"));
        assert_eq!(result.decision.questions_for_human.len(), 3);
        assert!(runner.probes_run().is_empty());
        assert_eq!(policy.calls(), 1);
    }

    #[test]
    fn targeted_round_merges_probe_results() {
        let runner = ScriptedProbeRunner::new();
        let policy =
            ScriptedPolicy::new(vec![DecisionType::NeedMoreEvidence, DecisionType::ClearFix]);
        let result = InvestigationLoop::new(&runner, &policy, config(5, 3))
            .investigate(&failure("ci_fail", "tests failed"), &phase());
        assert_eq!(result.rounds, 2);
        assert_eq!(result.decision.decision_type, DecisionType::ClearFix);
        assert_eq!(runner.probes_run(), vec![VERBOSE_TESTS_PROBE, WORKSPACE_STATUS_PROBE]);
        assert!(result.evidence.contains_key("round_2_verbose_tests"));
        assert!(result.evidence.contains_key("round_2_workspace_status"));
        assert_eq!(result.gaps_identified.len(), 2);
        assert!(result.timeline.iter().any(|t| t.starts_with("Round 2: running 2 probes")));
    }

    #[test]
    fn probes_per_round_are_capped() {
        let runner = ScriptedProbeRunner::new();
        let policy =
            ScriptedPolicy::new(vec![DecisionType::NeedMoreEvidence, DecisionType::ClearFix]);
        let result = InvestigationLoop::new(&runner, &policy, config(5, 1))
            .investigate(&failure("ci_fail", "tests failed"), &phase());
        assert_eq!(runner.probes_run(), vec![VERBOSE_TESTS_PROBE]);
        assert_eq!(result.probes_executed.len(), 1);
    }

    #[test]
    fn exhausting_rounds_forces_ambiguous() {
        let runner = ScriptedProbeRunner::new().failing_probes();
        let policy = ScriptedPolicy::new(vec![DecisionType::NeedMoreEvidence]);
        let result = InvestigationLoop::new(&runner, &policy, config(3, 3))
            .investigate(&failure("ci_fail", "tests failed"), &phase());
        assert_eq!(result.rounds, 3);
        assert_eq!(result.decision.decision_type, DecisionType::Ambiguous);
        assert!(result.decision.rationale.contains("exhausted 3 rounds"));
        assert_eq!(result.decision.questions_for_human.len(), 3);
        // Rounds 2 and 3 each tried both probes.
        assert_eq!(runner.probes_run().len(), 4);
        assert_eq!(policy.calls(), 3);
        assert!(result.timeline.iter().any(|t| t.contains("probe verbose_tests failed")));
        assert!(result.timeline.last().is_some_and(|t| t.contains("max rounds")));
    }

    #[test]
    fn diagnostics_failure_is_recorded_not_raised() {
        let runner = ScriptedProbeRunner::new().failing_diagnostics();
        let policy = ScriptedPolicy::new(vec![DecisionType::Ambiguous]);
        let result = InvestigationLoop::new(&runner, &policy, config(5, 3))
            .investigate(&failure("ci_fail", "x"), &phase());
        assert_eq!(result.rounds, 1);
        assert!(!result.evidence.contains_key(INITIAL_DIAGNOSTICS_KEY));
        assert!(result.timeline.iter().any(|t| t.contains("diagnostics failed")));
    }
}
