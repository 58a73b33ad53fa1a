//! Append-only evidence accumulated during one investigation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::core::types::{FailureContext, ProbeRunResult};

pub const FAILURE_CONTEXT_KEY: &str = "failure_context";
pub const INITIAL_DIAGNOSTICS_KEY: &str = "initial_diagnostics";
pub const DEEP_RETRIEVAL_KEY: &str = "deep_retrieval";
pub const SECOND_OPINION_KEY: &str = "second_opinion";
pub const MEMORY_ENTRIES_KEY: &str = "memory_entries";
pub const ROUND_KEY_PREFIX: &str = "round_";

/// Named evidence entries.
///
/// Entries are never replaced once inserted, so the bundle only grows within
/// an investigation. Keys iterate in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceBundle {
    entries: BTreeMap<String, Value>,
}

impl EvidenceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a bundle with the failure snapshot under `failure_context`.
    pub fn with_failure_context(context: &FailureContext) -> Self {
        let mut bundle = Self::new();
        bundle.insert(FAILURE_CONTEXT_KEY, failure_context_value(context));
        bundle
    }

    /// Insert a new entry. Returns false (and keeps the old value) if the key exists.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        if self.entries.contains_key(&key) {
            debug!(key = %key, "evidence key already present, keeping first value");
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failure snapshot stored under `failure_context`, if any.
    ///
    /// Missing or malformed fields fall back to their defaults.
    pub fn failure_context(&self) -> Option<FailureContext> {
        self.get(FAILURE_CONTEXT_KEY)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn error_message(&self) -> String {
        self.failure_context()
            .map(|ctx| ctx.error_message)
            .unwrap_or_default()
    }

    /// True if any probe round has contributed evidence.
    pub fn has_round_entries(&self) -> bool {
        self.keys().any(|key| key.starts_with(ROUND_KEY_PREFIX))
    }

    /// True if any diagnostics entry reports at least one executed probe.
    pub fn has_diagnostic_probes(&self) -> bool {
        self.iter().any(|(key, value)| {
            key.contains("diagnostics")
                && value
                    .get("probe_count")
                    .and_then(Value::as_u64)
                    .is_some_and(|count| count > 0)
        })
    }

    /// True if any entry came from a probe with the given name, either in the
    /// baseline diagnostics or in a targeted round.
    pub fn has_probe(&self, probe_name: &str) -> bool {
        let suffix = format!("_{probe_name}");
        if self
            .keys()
            .any(|key| key.starts_with(ROUND_KEY_PREFIX) && key.ends_with(&suffix))
        {
            return true;
        }
        self.get(INITIAL_DIAGNOSTICS_KEY)
            .and_then(|diag| diag.get("probes"))
            .and_then(Value::as_array)
            .is_some_and(|probes| {
                probes
                    .iter()
                    .any(|p| p.get("probe_name").and_then(Value::as_str) == Some(probe_name))
            })
    }
}

/// Evidence key for a probe executed in a targeted round.
pub fn round_key(round: u32, probe_name: &str) -> String {
    format!("{ROUND_KEY_PREFIX}{round}_{probe_name}")
}

/// JSON form of a probe result as merged into the bundle, with previews
/// capped at `preview_chars` characters.
pub fn probe_entry(result: &ProbeRunResult, preview_chars: usize) -> Value {
    let commands: Vec<Value> = result
        .commands
        .iter()
        .map(|cmd| {
            serde_json::json!({
                "command": cmd.redacted_command,
                "exit_code": cmd.exit_code,
                "stdout_preview": preview(&cmd.stdout_preview, preview_chars),
                "stderr_preview": preview(&cmd.stderr_preview, preview_chars),
                "resolved": cmd.resolved,
            })
        })
        .collect();
    serde_json::json!({
        "probe_name": result.probe_name,
        "resolved": result.resolved(),
        "commands": commands,
    })
}

/// First `max_chars` characters of `text`.
pub fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn failure_context_value(context: &FailureContext) -> Value {
    serde_json::to_value(context).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProbeCommandResult;
    use serde_json::json;

    #[test]
    fn insert_never_overwrites() {
        let mut bundle = EvidenceBundle::new();
        assert!(bundle.insert("a", json!(1)));
        assert!(!bundle.insert("a", json!(2)));
        assert_eq!(bundle.get("a"), Some(&json!(1)));
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn failure_context_round_trips_through_bundle() {
        let ctx = FailureContext {
            failure_class: "ci_fail".to_string(),
            error_message: "boom".to_string(),
            builder_attempts: 2,
            ..FailureContext::default()
        };
        let bundle = EvidenceBundle::with_failure_context(&ctx);
        assert_eq!(bundle.failure_context(), Some(ctx));
        assert_eq!(bundle.error_message(), "boom");
    }

    #[test]
    fn detects_round_and_diagnostic_entries() {
        let mut bundle = EvidenceBundle::new();
        assert!(!bundle.has_round_entries());
        assert!(!bundle.has_diagnostic_probes());

        bundle.insert(INITIAL_DIAGNOSTICS_KEY, json!({"probe_count": 0}));
        assert!(!bundle.has_diagnostic_probes());

        bundle.insert("secondary_diagnostics", json!({"probe_count": 2}));
        assert!(bundle.has_diagnostic_probes());

        bundle.insert(round_key(2, "git_diff_stat"), json!({}));
        assert!(bundle.has_round_entries());
        assert!(bundle.has_probe("git_diff_stat"));
        assert!(!bundle.has_probe("diff_stat"));
    }

    #[test]
    fn has_probe_checks_baseline_diagnostics() {
        let mut bundle = EvidenceBundle::new();
        bundle.insert(
            INITIAL_DIAGNOSTICS_KEY,
            json!({"probe_count": 1, "probes": [{"probe_name": "package_list"}]}),
        );
        assert!(bundle.has_probe("package_list"));
        assert!(!bundle.has_probe("verbose_tests"));
    }

    #[test]
    fn probe_entry_caps_previews_by_chars() {
        let result = ProbeRunResult {
            probe_name: "verbose_tests".to_string(),
            commands: vec![ProbeCommandResult {
                redacted_command: "pytest -vv".to_string(),
                exit_code: Some(1),
                stdout_preview: "é".repeat(600),
                stderr_preview: "short".to_string(),
                resolved: false,
            }],
        };
        let entry = probe_entry(&result, 500);
        let stdout = entry["commands"][0]["stdout_preview"]
            .as_str()
            .expect("stdout");
        assert_eq!(stdout.chars().count(), 500);
        assert_eq!(entry["commands"][0]["exit_code"], 1);
        assert_eq!(entry["resolved"], false);
    }
}
