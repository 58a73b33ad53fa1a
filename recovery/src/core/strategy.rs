//! Ordered rule registry that turns a failure into candidate fix strategies.
//!
//! Each rule is a `(matches, generate)` pair. Rules are evaluated in
//! registration order and every matching rule may contribute one strategy;
//! the decision gate never needs to change when a rule is added.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{FailureContext, FixStrategy, Phase, StrategyKind};

pub const IMPORT_FIX_CONFIDENCE: f64 = 0.85;
pub const TEST_FIX_CONFIDENCE: f64 = 0.6;
pub const PATCH_FIX_CONFIDENCE: f64 = 0.7;

const DEFAULT_TEST_FIX_LINES: u32 = 20;
const DEFAULT_PATCH_FIX_LINES: u32 = 50;

static CANNOT_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"cannot import name ['"]?(\w+)['"]?(?:\s+from\s+['"]?([\w.]+)['"]?)?"#)
        .expect("valid import regex")
});
static NO_MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"No module named ['"]?([\w.]+)['"]?"#).expect("valid module regex")
});
static PATCH_TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\+\+\+ b/(\S+)").expect("valid patch target regex"));

/// A single failure pattern and the strategy it produces.
#[derive(Clone, Copy)]
pub struct StrategyRule {
    pub name: &'static str,
    pub matches: fn(&FailureContext) -> bool,
    pub generate: fn(&FailureContext, &Phase) -> Option<FixStrategy>,
}

impl std::fmt::Debug for StrategyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRule")
            .field("name", &self.name)
            .finish()
    }
}

/// Ordered collection of strategy rules.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    rules: Vec<StrategyRule>,
}

impl Default for StrategyRegistry {
    /// Import, test and patch rules, in that order.
    fn default() -> Self {
        Self {
            rules: vec![
                StrategyRule {
                    name: "import_fix",
                    matches: is_import_failure,
                    generate: import_fix_strategy,
                },
                StrategyRule {
                    name: "test_fix",
                    matches: is_test_failure,
                    generate: test_fix_strategy,
                },
                StrategyRule {
                    name: "patch_fix",
                    matches: is_patch_failure,
                    generate: patch_fix_strategy,
                },
            ],
        }
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule; it is evaluated after all existing rules.
    pub fn register(&mut self, rule: StrategyRule) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    /// Strategies from every matching rule, in rule order.
    pub fn generate(&self, failure: &FailureContext, phase: &Phase) -> Vec<FixStrategy> {
        self.rules
            .iter()
            .filter(|rule| (rule.matches)(failure))
            .filter_map(|rule| (rule.generate)(failure, phase))
            .collect()
    }
}

pub fn is_import_failure(failure: &FailureContext) -> bool {
    failure.failure_class.to_lowercase().contains("import")
        || failure.error_message.contains("ImportError")
        || failure.error_message.contains("ModuleNotFoundError")
}

pub fn is_test_failure(failure: &FailureContext) -> bool {
    let class = failure.failure_class.to_lowercase();
    class.contains("test") || class.contains("ci_fail")
}

pub fn is_patch_failure(failure: &FailureContext) -> bool {
    failure.failure_class.to_lowercase().contains("patch") || !failure.patch_errors.is_empty()
}

/// Symbol and optional source module named by an import error.
pub fn extract_import_target(message: &str) -> Option<(String, Option<String>)> {
    if let Some(caps) = CANNOT_IMPORT_RE.captures(message) {
        let symbol = caps.get(1)?.as_str().to_string();
        let module = caps.get(2).map(|m| m.as_str().to_string());
        return Some((symbol, module));
    }
    let caps = NO_MODULE_RE.captures(message)?;
    let dotted = caps.get(1)?.as_str();
    match dotted.rsplit_once('.') {
        Some((parent, leaf)) => Some((leaf.to_string(), Some(parent.to_string()))),
        None => Some((dotted.to_string(), None)),
    }
}

fn import_fix_strategy(failure: &FailureContext, phase: &Phase) -> Option<FixStrategy> {
    let (symbol, module) = extract_import_target(&failure.error_message)?;
    let target = import_target_file(phase, module.as_deref());
    let files = vec![target];
    Some(FixStrategy {
        description: format!("Add missing import for '{symbol}'"),
        touches_protected_paths: touches_protected(&files, &phase.protected_paths),
        kind: StrategyKind::AddImport { symbol, module },
        files_to_modify: files,
        estimated_lines_changed: 1,
        meets_deliverables: phase.deliverables.clone(),
        passes_acceptance_criteria: phase.acceptance_criteria.clone(),
        side_effects: Vec::new(),
        confidence: IMPORT_FIX_CONFIDENCE,
    })
}

/// First deliverable that is a package `__init__.py`, else a path derived
/// from the module name or the first deliverable's directory.
fn import_target_file(phase: &Phase, module: Option<&str>) -> String {
    if let Some(init) = phase
        .deliverables
        .iter()
        .find(|d| d.ends_with("__init__.py"))
    {
        return init.clone();
    }
    if let Some(module) = module.filter(|m| !m.starts_with('.')) {
        return format!("{}/__init__.py", module.replace('.', "/"));
    }
    match phase
        .deliverables
        .first()
        .and_then(|d| d.rsplit_once('/'))
    {
        Some((dir, _)) => format!("{dir}/__init__.py"),
        None => "__init__.py".to_string(),
    }
}

fn test_fix_strategy(_failure: &FailureContext, phase: &Phase) -> Option<FixStrategy> {
    let mut files: Vec<String> = phase
        .deliverables
        .iter()
        .filter(|d| looks_like_test(d))
        .cloned()
        .collect();
    if files.is_empty() {
        files = phase.deliverables.clone();
    }
    Some(FixStrategy {
        kind: StrategyKind::FixTests,
        description: "Fix failing tests".to_string(),
        touches_protected_paths: touches_protected(&files, &phase.protected_paths),
        meets_deliverables: files.clone(),
        files_to_modify: files,
        estimated_lines_changed: DEFAULT_TEST_FIX_LINES,
        passes_acceptance_criteria: phase.acceptance_criteria.clone(),
        side_effects: vec!["Test expectations may change".to_string()],
        confidence: TEST_FIX_CONFIDENCE,
    })
}

fn patch_fix_strategy(failure: &FailureContext, phase: &Phase) -> Option<FixStrategy> {
    let patch = failure.last_patch.as_deref().unwrap_or_default();
    let mut seen = BTreeSet::new();
    let mut files: Vec<String> = PATCH_TARGET_RE
        .captures_iter(patch)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|file| seen.insert(file.clone()))
        .collect();
    if files.is_empty() {
        files = phase.deliverables.clone();
    }
    let changed = count_changed_lines(patch);
    Some(FixStrategy {
        kind: StrategyKind::ReapplyPatch,
        description: "Resolve conflicts and reapply patch".to_string(),
        touches_protected_paths: touches_protected(&files, &phase.protected_paths),
        files_to_modify: files,
        estimated_lines_changed: if changed == 0 {
            DEFAULT_PATCH_FIX_LINES
        } else {
            changed
        },
        meets_deliverables: phase.deliverables.clone(),
        passes_acceptance_criteria: phase.acceptance_criteria.clone(),
        side_effects: vec![
            "Reapplying may overwrite concurrent edits to the same files".to_string(),
        ],
        confidence: PATCH_FIX_CONFIDENCE,
    })
}

fn looks_like_test(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    path.starts_with("tests/")
        || path.contains("/tests/")
        || file.starts_with("test_")
        || file.ends_with("_test.py")
}

fn count_changed_lines(patch: &str) -> u32 {
    let count = patch
        .lines()
        .filter(|line| {
            (line.starts_with('+') && !line.starts_with("+++"))
                || (line.starts_with('-') && !line.starts_with("---"))
        })
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// True if any file starts with one of the protected prefixes.
pub fn touches_protected(files: &[String], protected: &[String]) -> bool {
    files.iter().any(|file| {
        protected
            .iter()
            .filter(|prefix| !prefix.is_empty())
            .any(|prefix| file.starts_with(prefix.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(deliverables: &[&str]) -> Phase {
        Phase {
            id: "phase-1".to_string(),
            deliverables: deliverables.iter().map(|d| d.to_string()).collect(),
            ..Phase::default()
        }
    }

    fn failure(class: &str, message: &str) -> FailureContext {
        FailureContext {
            failure_class: class.to_string(),
            error_message: message.to_string(),
            ..FailureContext::default()
        }
    }

    #[test]
    fn extracts_symbol_from_cannot_import() {
        assert_eq!(
            extract_import_target("ImportError: cannot import name 'Foo'"),
            Some(("Foo".to_string(), None))
        );
        assert_eq!(
            extract_import_target("cannot import name 'Bar' from 'pkg.core' (x.py)"),
            Some(("Bar".to_string(), Some("pkg.core".to_string())))
        );
    }

    #[test]
    fn extracts_module_from_module_not_found() {
        assert_eq!(
            extract_import_target("ModuleNotFoundError: No module named 'pkg.utils'"),
            Some(("utils".to_string(), Some("pkg".to_string())))
        );
        assert_eq!(
            extract_import_target("No module named 'yaml'"),
            Some(("yaml".to_string(), None))
        );
        assert_eq!(extract_import_target("something else"), None);
    }

    #[test]
    fn import_rule_targets_first_init_deliverable() {
        let strategies = StrategyRegistry::default().generate(
            &failure("generic", "ImportError: cannot import name 'Foo'"),
            &phase(&["pkg/models.py", "pkg/__init__.py", "other/__init__.py"]),
        );
        assert_eq!(strategies.len(), 1);
        let s = &strategies[0];
        assert_eq!(s.files_to_modify, vec!["pkg/__init__.py"]);
        assert_eq!(s.confidence, IMPORT_FIX_CONFIDENCE);
        assert!(!s.touches_protected_paths);
    }

    #[test]
    fn import_rule_derives_fallback_path() {
        let from_module = StrategyRegistry::default().generate(
            &failure("import_error", "cannot import name 'X' from 'app.core'"),
            &phase(&["app/core/models.py"]),
        );
        assert_eq!(from_module[0].files_to_modify, vec!["app/core/__init__.py"]);

        let from_deliverable = StrategyRegistry::default().generate(
            &failure("import_error", "cannot import name 'X'"),
            &phase(&["lib/thing.py"]),
        );
        assert_eq!(from_deliverable[0].files_to_modify, vec!["lib/__init__.py"]);
    }

    #[test]
    fn multiple_rules_contribute_in_order() {
        let mut f = failure("ci_fail", "ImportError: cannot import name 'Foo'");
        f.patch_errors.push("hunk 2 failed".to_string());
        let names: Vec<String> = StrategyRegistry::default()
            .generate(&f, &phase(&["pkg/__init__.py", "tests/test_pkg.py"]))
            .into_iter()
            .map(|s| s.description)
            .collect();
        assert_eq!(
            names,
            vec![
                "Add missing import for 'Foo'",
                "Fix failing tests",
                "Resolve conflicts and reapply patch"
            ]
        );
    }

    #[test]
    fn test_rule_prefers_test_deliverables() {
        let strategies = StrategyRegistry::default().generate(
            &failure("test_failure", "2 failed"),
            &phase(&["src/app.py", "tests/test_app.py"]),
        );
        assert_eq!(strategies[0].files_to_modify, vec!["tests/test_app.py"]);
        assert_eq!(strategies[0].confidence, TEST_FIX_CONFIDENCE);
    }

    #[test]
    fn patch_rule_reads_targets_from_last_patch() {
        let mut f = failure("patch_apply_error", "patch does not apply");
        f.last_patch = Some(
            "--- a/src/a.py\n+++ b/src/a.py\n@@ -1 +1 @@\n-old\n+new\n".to_string(),
        );
        let strategies = StrategyRegistry::default().generate(&f, &phase(&["src/b.py"]));
        assert_eq!(strategies[0].files_to_modify, vec!["src/a.py"]);
        assert_eq!(strategies[0].estimated_lines_changed, 2);
    }

    #[test]
    fn patch_rule_lists_each_target_once() {
        let mut f = failure("patch_apply_error", "patch does not apply");
        f.last_patch = Some(
            [
                "--- a/src/a.py\n+++ b/src/a.py\n@@ -1 +1 @@\n-old\n+new\n",
                "--- a/src/b.py\n+++ b/src/b.py\n@@ -1 +1 @@\n-old\n+new\n",
                "--- a/src/a.py\n+++ b/src/a.py\n@@ -9 +9 @@\n-old\n+new\n",
            ]
            .concat(),
        );
        let strategies = StrategyRegistry::default().generate(&f, &phase(&[]));
        assert_eq!(strategies[0].files_to_modify, vec!["src/a.py", "src/b.py"]);
    }

    #[test]
    fn protected_prefix_marks_strategy() {
        let mut p = phase(&["config/__init__.py"]);
        p.protected_paths = vec!["config/".to_string()];
        let strategies = StrategyRegistry::default()
            .generate(&failure("import_error", "cannot import name 'Y'"), &p);
        assert!(strategies[0].touches_protected_paths);
    }

    #[test]
    fn registry_accepts_new_rules() {
        let mut registry = StrategyRegistry::empty();
        registry.register(StrategyRule {
            name: "always",
            matches: |_| true,
            generate: |_, _| None,
        });
        assert_eq!(registry.rule_names(), vec!["always"]);
        assert!(
            registry
                .generate(&FailureContext::default(), &Phase::default())
                .is_empty()
        );
    }
}
