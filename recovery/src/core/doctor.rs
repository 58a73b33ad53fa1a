//! Doctor invocation policy, request/response contracts and model routing.
//!
//! Everything here is pure: counters come in as arguments and verdicts come
//! out as values. [`crate::core::doctor_state::DoctorState`] owns the
//! mutable counters and [`crate::invocation`] performs the side effects.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DELIVERABLES_VALIDATION_FAILED: &str = "deliverables_validation_failed";
pub const INFRA_ERROR: &str = "infra_error";

/// Confidence below which a prior Doctor verdict counts as shaky.
pub const LOW_PRIOR_CONFIDENCE: f64 = 0.5;
/// Distinct error categories at which a phase is considered complex.
pub const COMPLEX_CATEGORY_COUNT: usize = 2;

/// Budget limits for Doctor calls (`[doctor]` in config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorLimits {
    /// Builder attempts required before diagnosis (infra errors are exempt).
    pub min_builder_attempts: u32,
    pub max_calls_per_phase: u32,
    pub max_calls_per_run: u32,
    pub max_infra_calls_per_run: u32,
    /// Escalations to the strong model allowed per run.
    pub max_strong_calls_per_run: u32,
    /// Health-budget utilization at which diagnosis is forced early.
    pub health_near_limit_ratio: f64,
    /// Prepend the run's intention summary to the log excerpt.
    pub intention_context: bool,
}

impl Default for DoctorLimits {
    fn default() -> Self {
        Self {
            min_builder_attempts: 2,
            max_calls_per_phase: 2,
            max_calls_per_run: 10,
            max_infra_calls_per_run: 3,
            max_strong_calls_per_run: 5,
            health_near_limit_ratio: 0.8,
            intention_context: false,
        }
    }
}

/// Run-wide failure quota snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthBudget {
    pub failures: u32,
    pub limit: u32,
}

impl HealthBudget {
    /// Fraction of the budget consumed; 0 when no limit is configured.
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        f64::from(self.failures) / f64::from(self.limit)
    }
}

/// Action recommended by the Doctor.
///
/// Unrecognised action strings are preserved in [`DoctorAction::Unknown`] so
/// they can be logged and handled as a retry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DoctorAction {
    RetryWithFix,
    Replan,
    SkipPhase,
    MarkFatal,
    RollbackRun,
    ExecuteFix,
    Unknown(String),
}

impl DoctorAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::RetryWithFix => "retry_with_fix",
            Self::Replan => "replan",
            Self::SkipPhase => "skip_phase",
            Self::MarkFatal => "mark_fatal",
            Self::RollbackRun => "rollback_run",
            Self::ExecuteFix => "execute_fix",
            Self::Unknown(raw) => raw,
        }
    }
}

impl From<String> for DoctorAction {
    fn from(raw: String) -> Self {
        match raw.trim() {
            "retry_with_fix" => Self::RetryWithFix,
            "replan" => Self::Replan,
            "skip_phase" => Self::SkipPhase,
            "mark_fatal" => Self::MarkFatal,
            "rollback_run" => Self::RollbackRun,
            "execute_fix" => Self::ExecuteFix,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<&str> for DoctorAction {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<DoctorAction> for String {
    fn from(action: DoctorAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for DoctorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    Cheap,
    Strong,
}

/// Per-phase context carried into each Doctor call for model routing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    /// Sorted, de-duplicated error categories seen for the phase.
    pub distinct_error_categories: Vec<String>,
    pub prior_action: Option<DoctorAction>,
    pub prior_confidence: Option<f64>,
    pub doctor_calls_for_phase: u32,
}

/// Input to the diagnostic backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorRequest {
    pub run_id: String,
    pub phase_id: String,
    pub error_category: String,
    pub builder_attempts: u32,
    pub last_patch: Option<String>,
    pub patch_errors: Vec<String>,
    pub logs_excerpt: String,
    pub health_budget: HealthBudget,
}

/// Verdict returned by the diagnostic backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorResponse {
    pub action: DoctorAction,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub builder_hint: Option<String>,
    #[serde(default)]
    pub disable_providers: Vec<String>,
    #[serde(default)]
    pub model_tier: ModelTier,
    /// Commands for `execute_fix`, interpreted by the executor's fix handler.
    #[serde(default)]
    pub fix_commands: Vec<String>,
}

impl DoctorResponse {
    pub fn new(action: DoctorAction, confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            action,
            confidence,
            rationale: rationale.into(),
            builder_hint: None,
            disable_providers: Vec::new(),
            model_tier: ModelTier::Cheap,
            fix_commands: Vec::new(),
        }
    }
}

/// What the gate did with a Doctor response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    RetryWithHint,
    Replanned,
    ReplanFailed,
    PhaseSkipped,
    MarkedFatal,
    RolledBack,
    RollbackFailed,
    FixExecuted,
    FixFailed,
    /// The Doctor named an action this build does not know; treated as a retry.
    UnknownActionRetry(String),
}

impl fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryWithHint => f.write_str("retry_with_hint"),
            Self::Replanned => f.write_str("replanned"),
            Self::ReplanFailed => f.write_str("replan_failed"),
            Self::PhaseSkipped => f.write_str("phase_skipped"),
            Self::MarkedFatal => f.write_str("marked_fatal"),
            Self::RolledBack => f.write_str("rolled_back"),
            Self::RollbackFailed => f.write_str("rollback_failed"),
            Self::FixExecuted => f.write_str("fix_executed"),
            Self::FixFailed => f.write_str("fix_failed"),
            Self::UnknownActionRetry(raw) => write!(f, "unknown_action_retry({raw})"),
        }
    }
}

/// Outcome of dispatching a Doctor action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_taken: ActionTaken,
    /// Whether the executor should keep retrying the phase.
    pub continue_retrying: bool,
}

impl ActionOutcome {
    pub fn new(action_taken: ActionTaken, continue_retrying: bool) -> Self {
        Self {
            action_taken,
            continue_retrying,
        }
    }
}

/// Structured decision-audit entry handed to the executor's persistence hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAuditEntry {
    pub trigger: String,
    pub run_id: String,
    pub phase_id: String,
    pub choice: String,
    pub rationale: String,
    pub alternatives: Vec<String>,
    pub confidence: f64,
}

/// Why a Doctor call was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Validation failures get the phase's remaining builder attempts first.
    DeliverablesRetriesRemaining { attempts: u32, max: u32 },
    BelowMinAttempts { attempts: u32, min: u32 },
    PhaseLimit { calls: u32, max: u32 },
    RunLimit { calls: u32, max: u32 },
    InfraLimit { calls: u32, max: u32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeliverablesRetriesRemaining { attempts, max } => write!(
                f,
                "deliverables validation failed with builder attempts remaining ({attempts}/{max})"
            ),
            Self::BelowMinAttempts { attempts, min } => {
                write!(f, "builder attempts {attempts} below minimum {min}")
            }
            Self::PhaseLimit { calls, max } => write!(f, "phase doctor calls {calls}/{max}"),
            Self::RunLimit { calls, max } => write!(f, "run doctor calls {calls}/{max}"),
            Self::InfraLimit { calls, max } => write!(f, "run infra doctor calls {calls}/{max}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvocationVerdict {
    Invoke,
    /// Invoke now because the run's health budget is nearly exhausted.
    InvokeNearBudget { utilization: f64 },
    Skip(SkipReason),
}

impl InvocationVerdict {
    pub fn should_invoke(&self) -> bool {
        !matches!(self, Self::Skip(_))
    }
}

/// Counters and phase facts the policy is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateInputs<'a> {
    pub builder_attempts: u32,
    pub error_category: &'a str,
    /// Zero when the phase has no explicit limit (or is unknown).
    pub max_builder_attempts: u32,
    pub phase_calls: u32,
    pub run_calls: u32,
    pub infra_calls: u32,
    pub health: HealthBudget,
}

/// Apply the invocation rules in order; the first blocking rule wins.
pub fn evaluate(limits: &DoctorLimits, inputs: &GateInputs<'_>) -> InvocationVerdict {
    let is_infra = inputs.error_category == INFRA_ERROR;

    if inputs.error_category == DELIVERABLES_VALIDATION_FAILED
        && inputs.max_builder_attempts > 0
        && inputs.builder_attempts < inputs.max_builder_attempts
    {
        return InvocationVerdict::Skip(SkipReason::DeliverablesRetriesRemaining {
            attempts: inputs.builder_attempts,
            max: inputs.max_builder_attempts,
        });
    }
    if !is_infra && inputs.builder_attempts < limits.min_builder_attempts {
        return InvocationVerdict::Skip(SkipReason::BelowMinAttempts {
            attempts: inputs.builder_attempts,
            min: limits.min_builder_attempts,
        });
    }
    if let Some(reason) = limit_reached(
        limits,
        is_infra,
        inputs.phase_calls,
        inputs.run_calls,
        inputs.infra_calls,
    ) {
        return InvocationVerdict::Skip(reason);
    }

    let utilization = inputs.health.utilization();
    if utilization >= limits.health_near_limit_ratio {
        return InvocationVerdict::InvokeNearBudget { utilization };
    }
    InvocationVerdict::Invoke
}

/// The first call cap (phase, run, infra) that is already reached.
pub fn limit_reached(
    limits: &DoctorLimits,
    is_infra: bool,
    phase_calls: u32,
    run_calls: u32,
    infra_calls: u32,
) -> Option<SkipReason> {
    if phase_calls >= limits.max_calls_per_phase {
        return Some(SkipReason::PhaseLimit {
            calls: phase_calls,
            max: limits.max_calls_per_phase,
        });
    }
    if run_calls >= limits.max_calls_per_run {
        return Some(SkipReason::RunLimit {
            calls: run_calls,
            max: limits.max_calls_per_run,
        });
    }
    if is_infra && infra_calls >= limits.max_infra_calls_per_run {
        return Some(SkipReason::InfraLimit {
            calls: infra_calls,
            max: limits.max_infra_calls_per_run,
        });
    }
    None
}

/// Pick the model tier for a Doctor call.
///
/// Escalate only when allowed and the phase looks hard: several distinct
/// error categories, a shaky prior verdict, or a prior replan/fatal call.
pub fn choose_model_tier(context: &ContextSummary, allow_escalation: bool) -> ModelTier {
    if !allow_escalation {
        return ModelTier::Cheap;
    }
    let complex = context.distinct_error_categories.len() >= COMPLEX_CATEGORY_COUNT;
    let shaky = context
        .prior_confidence
        .is_some_and(|c| c < LOW_PRIOR_CONFIDENCE);
    let escalated_before = matches!(
        context.prior_action,
        Some(DoctorAction::Replan | DoctorAction::MarkFatal)
    );
    if complex || shaky || escalated_before {
        ModelTier::Strong
    } else {
        ModelTier::Cheap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(attempts: u32, category: &str) -> GateInputs<'_> {
        GateInputs {
            builder_attempts: attempts,
            error_category: category,
            max_builder_attempts: 0,
            phase_calls: 0,
            run_calls: 0,
            infra_calls: 0,
            health: HealthBudget::default(),
        }
    }

    #[test]
    fn below_min_attempts_is_skipped() {
        let verdict = evaluate(&DoctorLimits::default(), &inputs(0, "generic_failure"));
        assert_eq!(
            verdict,
            InvocationVerdict::Skip(SkipReason::BelowMinAttempts { attempts: 0, min: 2 })
        );
        assert!(!verdict.should_invoke());
    }

    #[test]
    fn infra_errors_skip_min_attempts() {
        let verdict = evaluate(&DoctorLimits::default(), &inputs(0, INFRA_ERROR));
        assert_eq!(verdict, InvocationVerdict::Invoke);
    }

    #[test]
    fn deliverables_failure_defers_until_builder_exhausted() {
        let mut i = inputs(3, DELIVERABLES_VALIDATION_FAILED);
        i.max_builder_attempts = 5;
        assert!(matches!(
            evaluate(&DoctorLimits::default(), &i),
            InvocationVerdict::Skip(SkipReason::DeliverablesRetriesRemaining {
                attempts: 3,
                max: 5
            })
        ));
        i.builder_attempts = 5;
        assert_eq!(evaluate(&DoctorLimits::default(), &i), InvocationVerdict::Invoke);
        // No explicit limit means no deferral.
        i.max_builder_attempts = 0;
        i.builder_attempts = 2;
        assert_eq!(evaluate(&DoctorLimits::default(), &i), InvocationVerdict::Invoke);
    }

    #[test]
    fn phase_limit_blocks_even_near_budget() {
        let mut i = inputs(5, "generic_failure");
        i.phase_calls = 2;
        i.health = HealthBudget { failures: 9, limit: 10 };
        assert_eq!(
            evaluate(&DoctorLimits::default(), &i),
            InvocationVerdict::Skip(SkipReason::PhaseLimit { calls: 2, max: 2 })
        );
    }

    #[test]
    fn run_and_infra_limits_block() {
        let mut i = inputs(5, "generic_failure");
        i.run_calls = 10;
        assert!(matches!(
            evaluate(&DoctorLimits::default(), &i),
            InvocationVerdict::Skip(SkipReason::RunLimit { .. })
        ));

        let mut infra = inputs(0, INFRA_ERROR);
        infra.infra_calls = 3;
        assert!(matches!(
            evaluate(&DoctorLimits::default(), &infra),
            InvocationVerdict::Skip(SkipReason::InfraLimit { .. })
        ));
        // The infra cap only applies to infra errors.
        let mut generic = inputs(2, "generic_failure");
        generic.infra_calls = 3;
        assert_eq!(evaluate(&DoctorLimits::default(), &generic), InvocationVerdict::Invoke);
    }

    #[test]
    fn near_budget_forces_invocation() {
        let mut i = inputs(2, "generic_failure");
        i.health = HealthBudget { failures: 8, limit: 10 };
        match evaluate(&DoctorLimits::default(), &i) {
            InvocationVerdict::InvokeNearBudget { utilization } => {
                assert!((utilization - 0.8).abs() < f64::EPSILON);
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn unlimited_health_budget_has_zero_utilization() {
        let budget = HealthBudget { failures: 7, limit: 0 };
        assert_eq!(budget.utilization(), 0.0);
    }

    #[test]
    fn action_parses_known_and_unknown_strings() {
        assert_eq!(DoctorAction::from("rollback_run"), DoctorAction::RollbackRun);
        assert_eq!(
            DoctorAction::from("reticulate"),
            DoctorAction::Unknown("reticulate".to_string())
        );
        let response: DoctorResponse =
            serde_json::from_str(r#"{"action":"execute_fix","confidence":0.9}"#).expect("parse");
        assert_eq!(response.action, DoctorAction::ExecuteFix);
        assert_eq!(response.model_tier, ModelTier::Cheap);
        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["action"], "execute_fix");
    }

    #[test]
    fn routing_escalates_only_when_allowed_and_warranted() {
        let simple = ContextSummary {
            distinct_error_categories: vec!["ci_fail".to_string()],
            ..ContextSummary::default()
        };
        assert_eq!(choose_model_tier(&simple, true), ModelTier::Cheap);

        let complex = ContextSummary {
            distinct_error_categories: vec!["ci_fail".to_string(), "patch_apply".to_string()],
            ..ContextSummary::default()
        };
        assert_eq!(choose_model_tier(&complex, true), ModelTier::Strong);
        assert_eq!(choose_model_tier(&complex, false), ModelTier::Cheap);

        let shaky = ContextSummary {
            prior_confidence: Some(0.3),
            ..simple.clone()
        };
        assert_eq!(choose_model_tier(&shaky, true), ModelTier::Strong);

        let replanned = ContextSummary {
            prior_action: Some(DoctorAction::Replan),
            ..simple
        };
        assert_eq!(choose_model_tier(&replanned, true), ModelTier::Strong);
    }
}
