//! Evidence gap analysis and the built-in probe catalog.
//!
//! Gap rules are evaluated in a fixed order and the result is sorted stably by
//! priority, so the same evidence always yields the same probe plan. A gap is
//! only reported while its probe has not yet contributed evidence; otherwise
//! the loop would keep re-running the same probe.

use std::collections::BTreeSet;

use crate::core::decision::MIN_SUFFICIENT_ERROR_LEN;
use crate::core::evidence::EvidenceBundle;
use crate::core::strategy::{is_import_failure, is_patch_failure, is_test_failure};
use crate::core::types::{EvidenceGap, FailureContext, GapType, Phase, Probe, ProbeCommand};

pub const VERBOSE_TESTS_PROBE: &str = "verbose_tests";
pub const DELIVERABLE_CONTENTS_PROBE: &str = "deliverable_contents";
pub const PACKAGE_LIST_PROBE: &str = "package_list";
pub const GIT_DIFF_STAT_PROBE: &str = "git_diff_stat";
pub const WORKSPACE_STATUS_PROBE: &str = "workspace_status";

const MAX_DELIVERABLES_TO_READ: usize = 3;

const DEPENDENCY_MARKERS: &[&str] = &[
    "dependency",
    "dependencies",
    "requirement",
    "no matching distribution",
    "version conflict",
    "pip install",
    "no module named",
    "distributionnotfound",
];

pub fn verbose_tests_probe() -> Probe {
    Probe {
        name: VERBOSE_TESTS_PROBE.to_string(),
        commands: vec![ProbeCommand::new(["pytest", "-vv", "--tb=long", "-x"])],
    }
}

/// `cat` of the first few deliverables, or a directory listing when the phase
/// declares none.
pub fn deliverable_contents_probe(phase: &Phase) -> Probe {
    let command = if phase.deliverables.is_empty() {
        ProbeCommand::new(["ls", "-la"])
    } else {
        ProbeCommand::new(
            std::iter::once("cat".to_string()).chain(
                phase
                    .deliverables
                    .iter()
                    .take(MAX_DELIVERABLES_TO_READ)
                    .cloned(),
            ),
        )
    };
    Probe {
        name: DELIVERABLE_CONTENTS_PROBE.to_string(),
        commands: vec![command],
    }
}

pub fn package_list_probe() -> Probe {
    Probe {
        name: PACKAGE_LIST_PROBE.to_string(),
        commands: vec![ProbeCommand::new(["pip", "list"])],
    }
}

pub fn git_diff_stat_probe() -> Probe {
    Probe {
        name: GIT_DIFF_STAT_PROBE.to_string(),
        commands: vec![ProbeCommand::new(["git", "diff", "--stat"])],
    }
}

pub fn workspace_status_probe() -> Probe {
    Probe {
        name: WORKSPACE_STATUS_PROBE.to_string(),
        commands: vec![ProbeCommand::new(["git", "status", "--short"])],
    }
}

/// Probe used for a gap that carries no suggestion of its own.
pub fn default_probe(gap_type: GapType, phase: &Phase) -> Probe {
    match gap_type {
        GapType::MissingTestOutput => verbose_tests_probe(),
        GapType::MissingFileContent => deliverable_contents_probe(phase),
        GapType::MissingDependencyInfo => package_list_probe(),
        GapType::MissingGitState => git_diff_stat_probe(),
        GapType::MissingErrorMessage => workspace_status_probe(),
    }
}

/// Baseline probe set run in round 1 for a failure class.
pub fn baseline_probes(failure: &FailureContext, phase: &Phase) -> Vec<Probe> {
    let mut probes = Vec::new();
    if is_test_failure(failure) {
        probes.push(verbose_tests_probe());
    }
    if is_import_failure(failure) {
        probes.push(deliverable_contents_probe(phase));
    }
    if is_dependency_failure(failure) {
        probes.push(package_list_probe());
    }
    if is_patch_failure(failure) {
        probes.push(git_diff_stat_probe());
    }
    probes.push(workspace_status_probe());
    dedup_by_name(probes)
}

pub fn is_dependency_failure(failure: &FailureContext) -> bool {
    let class = failure.failure_class.to_lowercase();
    let message = failure.error_message.to_lowercase();
    class.contains("dependency") || DEPENDENCY_MARKERS.iter().any(|m| message.contains(m))
}

/// Gaps in `evidence` for this failure, most urgent first.
pub fn analyze_gaps(
    evidence: &EvidenceBundle,
    failure: &FailureContext,
    phase: &Phase,
) -> Vec<EvidenceGap> {
    let mut gaps = Vec::new();

    if is_test_failure(failure) && !evidence.has_probe(VERBOSE_TESTS_PROBE) {
        gaps.push(EvidenceGap {
            gap_type: GapType::MissingTestOutput,
            description: "No verbose test output for a test failure".to_string(),
            priority: 1,
            suggested_probe: Some(verbose_tests_probe()),
            rationale: "Full tracebacks identify the failing assertion".to_string(),
        });
    }
    if is_import_failure(failure) && !evidence.has_probe(DELIVERABLE_CONTENTS_PROBE) {
        gaps.push(EvidenceGap {
            gap_type: GapType::MissingFileContent,
            description: "Contents of the importing modules are unknown".to_string(),
            priority: 1,
            suggested_probe: None,
            rationale: "The import fix depends on what the target module exports".to_string(),
        });
    }
    if is_dependency_failure(failure) && !evidence.has_probe(PACKAGE_LIST_PROBE) {
        gaps.push(EvidenceGap {
            gap_type: GapType::MissingDependencyInfo,
            description: "Installed package versions are unknown".to_string(),
            priority: 2,
            suggested_probe: Some(package_list_probe()),
            rationale: "Dependency errors depend on what is actually installed".to_string(),
        });
    }
    if is_patch_failure(failure) && !evidence.has_probe(GIT_DIFF_STAT_PROBE) {
        gaps.push(EvidenceGap {
            gap_type: GapType::MissingGitState,
            description: "Working tree changes are unknown for a patch failure".to_string(),
            priority: 1,
            suggested_probe: Some(git_diff_stat_probe()),
            rationale: "A conflicting patch has to be compared with the current tree".to_string(),
        });
    }
    if failure.error_message.trim().chars().count() <= MIN_SUFFICIENT_ERROR_LEN
        && !evidence.has_probe(WORKSPACE_STATUS_PROBE)
    {
        gaps.push(EvidenceGap {
            gap_type: GapType::MissingErrorMessage,
            description: "Error message is missing or too short to classify".to_string(),
            priority: 1,
            suggested_probe: None,
            rationale: "Workspace state can stand in for a missing error message".to_string(),
        });
    }

    gaps.sort_by_key(|gap| gap.priority);
    gaps
}

/// Concrete probes for `gaps`, in gap order, at most `max` of them.
pub fn gaps_to_probes(gaps: &[EvidenceGap], phase: &Phase, max: usize) -> Vec<Probe> {
    let probes = gaps
        .iter()
        .map(|gap| {
            gap.suggested_probe
                .clone()
                .unwrap_or_else(|| default_probe(gap.gap_type, phase))
        })
        .collect();
    let mut probes = dedup_by_name(probes);
    probes.truncate(max);
    probes
}

fn dedup_by_name(probes: Vec<Probe>) -> Vec<Probe> {
    let mut seen = BTreeSet::new();
    probes
        .into_iter()
        .filter(|probe| seen.insert(probe.name.clone()))
        .collect()
}
