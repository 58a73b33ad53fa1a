//! Deterministic classification of evidence into an actionable decision.
//!
//! The decision maker never mutates anything: it reads the evidence bundle
//! and the phase constraints, and (for clear fixes only) reads the target
//! file to render a patch stub.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::evidence::EvidenceBundle;
use crate::core::patch::{import_insertion_diff, import_line};
use crate::core::strategy::{StrategyRegistry, touches_protected};
use crate::core::types::{
    Decision, DecisionType, FailureContext, FixStrategy, Phase, RiskLevel, StrategyKind,
};

/// Error messages longer than this are sufficient evidence on their own.
pub const MIN_SUFFICIENT_ERROR_LEN: usize = 50;

/// Thresholds for risk assessment and auto-fix gating (`[decision]` in config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Changes above this many lines are at least `MEDIUM` risk.
    pub low_risk_threshold: u32,
    /// Changes above this many lines are `HIGH` risk.
    pub medium_risk_threshold: u32,
    pub min_confidence_for_auto_fix: f64,
    /// Any target path starting with one of these is `HIGH` risk.
    pub protected_path_prefixes: Vec<String>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            low_risk_threshold: 100,
            medium_risk_threshold: 200,
            min_confidence_for_auto_fix: 0.7,
            protected_path_prefixes: vec![".git/".to_string(), ".autonomous_runs/".to_string()],
        }
    }
}

/// Anything that can classify evidence for a phase.
///
/// The investigation loop depends on this seam rather than on
/// [`DecisionMaker`] directly so tests can script verdicts.
pub trait DecisionPolicy {
    fn decide(&self, evidence: &EvidenceBundle, phase: &Phase) -> Decision;
}

impl<D: DecisionPolicy + ?Sized> DecisionPolicy for &D {
    fn decide(&self, evidence: &EvidenceBundle, phase: &Phase) -> Decision {
        (**self).decide(evidence, phase)
    }
}

/// Rule-based decision maker.
#[derive(Debug, Clone)]
pub struct DecisionMaker {
    config: DecisionConfig,
    registry: StrategyRegistry,
    workspace: Option<PathBuf>,
}

impl DecisionMaker {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            registry: StrategyRegistry::default(),
            workspace: None,
        }
    }

    /// Enable patch stubs by resolving target files under `workspace`.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn make_decision(&self, evidence: &EvidenceBundle, phase: &Phase) -> Decision {
        if !is_sufficient(evidence) {
            debug!(phase_id = %phase.id, "evidence insufficient");
            return Decision::bare(DecisionType::NeedMoreEvidence, String::new());
        }

        let failure = evidence.failure_context().unwrap_or_default();
        let strategies = self.registry.generate(&failure, phase);
        let Some(selected_idx) = select_best(&strategies) else {
            info!(
                phase_id = %phase.id,
                failure_class = %failure.failure_class,
                "no strategy matched"
            );
            return no_strategy_decision(&failure);
        };
        let selected = &strategies[selected_idx];

        let risk = self.assess_risk(selected);
        let missing_deliverables = missing(&phase.deliverables, &selected.meets_deliverables);
        let missing_criteria = missing(
            &phase.acceptance_criteria,
            &selected.passes_acceptance_criteria,
        );

        let (decision_type, reason) = if risk == RiskLevel::High {
            (
                DecisionType::Risky,
                format!(
                    "Strategy '{}' is high risk and requires human approval.",
                    selected.description
                ),
            )
        } else if selected.confidence < self.config.min_confidence_for_auto_fix {
            (
                DecisionType::Ambiguous,
                format!(
                    "Confidence {:.2} is below the auto-fix threshold of {:.2}.",
                    selected.confidence, self.config.min_confidence_for_auto_fix
                ),
            )
        } else if !missing_deliverables.is_empty() {
            (
                DecisionType::Ambiguous,
                format!(
                    "Strategy '{}' does not cover all required deliverables.",
                    selected.description
                ),
            )
        } else {
            (
                DecisionType::ClearFix,
                format!(
                    "Selected '{}' with confidence {:.2}.",
                    selected.description, selected.confidence
                ),
            )
        };

        let rationale = build_rationale(
            &reason,
            phase,
            &missing_deliverables,
            &missing_criteria,
            risk,
            selected,
        );
        let questions = questions_for(decision_type, selected, &missing_deliverables);
        let required: BTreeSet<&String> = phase.deliverables.iter().collect();
        let deliverables_met = selected
            .meets_deliverables
            .iter()
            .filter(|d| required.contains(d))
            .cloned()
            .collect();

        let mut decision = Decision {
            decision_type,
            fix_strategy: Some(selected.clone()),
            rationale,
            risk_level: risk,
            alternatives_considered: alternatives(&strategies, selected_idx),
            deliverables_met,
            files_modified: selected.files_to_modify.clone(),
            net_deletion: net_deletion(selected),
            confidence: selected.confidence,
            questions_for_human: questions,
            patch: None,
        };

        if decision_type == DecisionType::ClearFix {
            decision.patch = self.patch_stub(selected);
        }
        info!(
            phase_id = %phase.id,
            decision = %decision.decision_type,
            risk = %decision.risk_level,
            confidence = decision.confidence,
            "decision made"
        );
        decision
    }

    /// `HIGH` on protected paths or large changes, `MEDIUM` on moderate size or
    /// any side effect, else `LOW`.
    pub fn assess_risk(&self, strategy: &FixStrategy) -> RiskLevel {
        let lines = strategy.estimated_lines_changed;
        if strategy.touches_protected_paths
            || touches_protected(
                &strategy.files_to_modify,
                &self.config.protected_path_prefixes,
            )
            || lines > self.config.medium_risk_threshold
        {
            return RiskLevel::High;
        }
        if lines > self.config.low_risk_threshold || !strategy.side_effects.is_empty() {
            return RiskLevel::Medium;
        }
        RiskLevel::Low
    }

    fn patch_stub(&self, strategy: &FixStrategy) -> Option<String> {
        let StrategyKind::AddImport { symbol, module } = &strategy.kind else {
            return None;
        };
        let workspace = self.workspace.as_ref()?;
        let target = strategy.files_to_modify.first()?;
        let original = fs::read_to_string(workspace.join(target)).unwrap_or_default();
        let diff =
            import_insertion_diff(target, &original, &import_line(symbol, module.as_deref()));
        if diff.is_empty() {
            warn!(target = %target, "generated patch is empty, no patch attached");
            return None;
        }
        Some(diff)
    }
}

impl DecisionPolicy for DecisionMaker {
    fn decide(&self, evidence: &EvidenceBundle, phase: &Phase) -> Decision {
        self.make_decision(evidence, phase)
    }
}

/// Long error message, a diagnostics entry with probes, or any round entry.
pub fn is_sufficient(evidence: &EvidenceBundle) -> bool {
    evidence.error_message().chars().count() > MIN_SUFFICIENT_ERROR_LEN
        || evidence.has_diagnostic_probes()
        || evidence.has_round_entries()
}

/// Index of the highest-confidence strategy; ties keep the earliest.
fn select_best(strategies: &[FixStrategy]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, strategy) in strategies.iter().enumerate() {
        match best {
            Some(b) if strategies[b].confidence >= strategy.confidence => {}
            _ => best = Some(idx),
        }
    }
    best
}

fn no_strategy_decision(failure: &FailureContext) -> Decision {
    let mut decision = Decision::bare(
        DecisionType::Ambiguous,
        format!(
            "No fix strategy matches failure class '{}'.",
            failure.failure_class
        ),
    );
    decision.questions_for_human = vec![
        "What is the root cause of this failure?".to_string(),
        "What approach should be taken to fix it?".to_string(),
    ];
    decision
}

fn missing(required: &[String], provided: &[String]) -> Vec<String> {
    let provided: BTreeSet<&String> = provided.iter().collect();
    required
        .iter()
        .filter(|item| !provided.contains(item))
        .cloned()
        .collect()
}

fn build_rationale(
    reason: &str,
    phase: &Phase,
    missing_deliverables: &[String],
    missing_criteria: &[String],
    risk: RiskLevel,
    strategy: &FixStrategy,
) -> String {
    let mut parts = vec![reason.to_string()];
    if missing_deliverables.is_empty() {
        parts.push(format!(
            "All {} required deliverables are met.",
            phase.deliverables.len()
        ));
    } else {
        parts.push(format!(
            "Missing deliverables: {}.",
            missing_deliverables.join(", ")
        ));
    }
    if !missing_criteria.is_empty() {
        parts.push(format!(
            "Unverified acceptance criteria: {}.",
            missing_criteria.join(", ")
        ));
    }
    parts.push(format!(
        "Risk {risk}: ~{} lines changed across {} file(s).",
        strategy.estimated_lines_changed,
        strategy.files_to_modify.len()
    ));
    if strategy.side_effects.is_empty() {
        parts.push("No side effects detected.".to_string());
    } else {
        parts.push(format!("Side effects: {}.", strategy.side_effects.join("; ")));
    }
    parts.join(" ")
}

fn alternatives(strategies: &[FixStrategy], selected: usize) -> Vec<String> {
    strategies
        .iter()
        .enumerate()
        .map(|(idx, s)| {
            if idx == selected {
                format!("SELECTED: {} (confidence {:.2})", s.description, s.confidence)
            } else {
                format!(
                    "REJECTED: {} (confidence {:.2}, {} side effect(s))",
                    s.description,
                    s.confidence,
                    s.side_effects.len()
                )
            }
        })
        .collect()
}

fn questions_for(
    decision_type: DecisionType,
    strategy: &FixStrategy,
    missing_deliverables: &[String],
) -> Vec<String> {
    match decision_type {
        DecisionType::Risky => vec![format!(
            "Approve high-risk change '{}' touching {}?",
            strategy.description,
            strategy.files_to_modify.join(", ")
        )],
        DecisionType::Ambiguous if !missing_deliverables.is_empty() => vec![format!(
            "How should the missing deliverables ({}) be produced?",
            missing_deliverables.join(", ")
        )],
        DecisionType::Ambiguous => vec![format!(
            "Is '{}' the right fix for this failure?",
            strategy.description
        )],
        DecisionType::ClearFix | DecisionType::NeedMoreEvidence => Vec::new(),
    }
}

fn net_deletion(strategy: &FixStrategy) -> i64 {
    match strategy.kind {
        StrategyKind::AddImport { .. } => -i64::from(strategy.estimated_lines_changed),
        StrategyKind::FixTests | StrategyKind::ReapplyPatch => 0,
    }
}
