//! Shared deterministic types for the recovery core.
//!
//! These types define stable contracts between the executor and the recovery
//! pipeline. They carry no I/O and serialize to stable JSON so decisions and
//! investigation results can be persisted by the caller.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a phase as tracked by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseState {
    Queued,
    Executing,
    GateBlocked,
    Complete,
    Failed,
}

/// One atomic unit of autonomous work within a run.
///
/// Owned by the executor; the recovery core only reads it and asks the
/// executor (through hooks) to change its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Phase {
    pub id: String,
    pub state: PhaseState,
    pub retry_attempt: u32,
    /// Builder attempts allowed before the phase is considered exhausted.
    /// Zero means "no explicit limit".
    pub max_builder_attempts: u32,
    /// Path prefixes the builder must never touch.
    pub protected_paths: Vec<String>,
    /// Files the phase must produce.
    pub deliverables: Vec<String>,
    pub acceptance_criteria: Vec<String>,
}

impl Default for Phase {
    fn default() -> Self {
        Self {
            id: String::new(),
            state: PhaseState::Queued,
            retry_attempt: 0,
            max_builder_attempts: 0,
            protected_paths: Vec::new(),
            deliverables: Vec::new(),
            acceptance_criteria: Vec::new(),
        }
    }
}

/// Immutable snapshot of a failed builder attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureContext {
    pub failure_class: String,
    pub error_message: String,
    pub builder_attempts: u32,
    pub last_patch: Option<String>,
    pub patch_errors: Vec<String>,
    pub logs_excerpt: String,
}

/// One command executed as part of a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeCommand {
    pub argv: Vec<String>,
}

impl ProbeCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// A named diagnostic that produces evidence when executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub commands: Vec<ProbeCommand>,
}

/// Outcome of one probe command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeCommandResult {
    /// Command line with secrets masked.
    pub redacted_command: String,
    /// `None` when the process was killed or never produced a status.
    pub exit_code: Option<i32>,
    pub stdout_preview: String,
    pub stderr_preview: String,
    /// True when the command ran to a zero exit code.
    pub resolved: bool,
}

/// Result of running a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRunResult {
    pub probe_name: String,
    pub commands: Vec<ProbeCommandResult>,
}

impl ProbeRunResult {
    pub fn resolved(&self) -> bool {
        !self.commands.is_empty() && self.commands.iter().all(|c| c.resolved)
    }
}

/// Category of missing evidence detected between investigation rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapType {
    MissingTestOutput,
    MissingFileContent,
    MissingDependencyInfo,
    MissingGitState,
    MissingErrorMessage,
}

impl GapType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingTestOutput => "missing_test_output",
            Self::MissingFileContent => "missing_file_content",
            Self::MissingDependencyInfo => "missing_dependency_info",
            Self::MissingGitState => "missing_git_state",
            Self::MissingErrorMessage => "missing_error_message",
        }
    }
}

impl fmt::Display for GapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hole in the evidence that a targeted probe could fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceGap {
    pub gap_type: GapType,
    pub description: String,
    /// Lower is more urgent.
    pub priority: u8,
    pub suggested_probe: Option<Probe>,
    pub rationale: String,
}

/// Concrete shape of a generated fix, used to render a patch stub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyKind {
    AddImport {
        symbol: String,
        module: Option<String>,
    },
    FixTests,
    ReapplyPatch,
}

/// A candidate remedy produced by the strategy rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixStrategy {
    pub kind: StrategyKind,
    pub description: String,
    pub files_to_modify: Vec<String>,
    pub estimated_lines_changed: u32,
    pub touches_protected_paths: bool,
    pub meets_deliverables: Vec<String>,
    pub passes_acceptance_criteria: Vec<String>,
    pub side_effects: Vec<String>,
    /// In `[0, 1]`.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    ClearFix,
    NeedMoreEvidence,
    Ambiguous,
    Risky,
}

impl DecisionType {
    /// Every type except `NeedMoreEvidence` ends an investigation.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::NeedMoreEvidence)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClearFix => "CLEAR_FIX",
            Self::NeedMoreEvidence => "NEED_MORE_EVIDENCE",
            Self::Ambiguous => "AMBIGUOUS",
            Self::Risky => "RISKY",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified verdict over the gathered evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub fix_strategy: Option<FixStrategy>,
    pub rationale: String,
    pub risk_level: RiskLevel,
    pub alternatives_considered: Vec<String>,
    pub deliverables_met: Vec<String>,
    pub files_modified: Vec<String>,
    /// Estimated lines removed minus lines added; negative means net addition.
    pub net_deletion: i64,
    pub confidence: f64,
    pub questions_for_human: Vec<String>,
    pub patch: Option<String>,
}

impl Decision {
    /// A decision with no strategy attached.
    pub fn bare(decision_type: DecisionType, rationale: impl Into<String>) -> Self {
        Self {
            decision_type,
            fix_strategy: None,
            rationale: rationale.into(),
            risk_level: RiskLevel::Unknown,
            alternatives_considered: Vec::new(),
            deliverables_met: Vec::new(),
            files_modified: Vec::new(),
            net_deletion: 0,
            confidence: 0.0,
            questions_for_human: Vec::new(),
            patch: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.decision_type.is_terminal()
    }
}

/// A run's "home" state captured at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// Branch name, or `HEAD` when the run started detached.
    pub branch: String,
    pub commit: String,
}

/// Final product of an investigation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestigationResult {
    pub decision: Decision,
    pub evidence: crate::core::evidence::EvidenceBundle,
    pub rounds: u32,
    pub probes_executed: Vec<ProbeRunResult>,
    pub timeline: Vec<String>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
    pub gaps_identified: Vec<EvidenceGap>,
}

fn serialize_duration_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
