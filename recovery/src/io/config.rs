//! Recovery configuration stored as TOML (default `.autonomous_runs/recovery.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::decision::DecisionConfig;
use crate::core::doctor::DoctorLimits;

/// Environment toggle for prepending the intention summary to Doctor logs.
pub const INTENTION_CONTEXT_ENV: &str = "AUTOPACK_INTENTION_CONTEXT";
pub const DEFAULT_CONFIG_PATH: &str = ".autonomous_runs/recovery.toml";

/// Recovery configuration (TOML).
///
/// Meant to be edited by humans. Missing fields default to the values the
/// executor ships with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryConfig {
    pub doctor: DoctorLimits,
    pub investigation: InvestigationConfig,
    pub decision: DecisionConfig,
    pub checkpoint: CheckpointConfig,
    pub probes: ProbeConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InvestigationConfig {
    pub max_rounds: u32,
    pub max_probes_per_round: usize,
    /// Characters of stdout/stderr kept per probe command in the evidence.
    pub preview_chars: usize,
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            max_probes_per_round: 3,
            preview_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Run layout root, relative to the workspace.
    pub runs_dir: PathBuf,
    pub git_timeout_secs: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from(".autonomous_runs"),
            git_timeout_secs: 30,
        }
    }
}

impl CheckpointConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-command timeout.
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Wall-clock budget for the round-1 baseline probe set.
    pub baseline_budget_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            output_limit_bytes: 100_000,
            baseline_budget_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Agent CLI used for Doctor calls (e.g. `["codex","exec"]`).
    pub command: Vec<String>,
    pub cheap_model: String,
    pub strong_model: String,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string()],
            cheap_model: "gpt-5-mini".to_string(),
            strong_model: "gpt-5".to_string(),
            timeout_secs: 120,
            output_limit_bytes: 100_000,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<()> {
        let d = &self.doctor;
        if d.max_calls_per_phase == 0 {
            return Err(anyhow!("doctor.max_calls_per_phase must be > 0"));
        }
        if d.max_calls_per_run == 0 {
            return Err(anyhow!("doctor.max_calls_per_run must be > 0"));
        }
        if d.max_infra_calls_per_run == 0 {
            return Err(anyhow!("doctor.max_infra_calls_per_run must be > 0"));
        }
        if !(d.health_near_limit_ratio > 0.0 && d.health_near_limit_ratio <= 1.0) {
            return Err(anyhow!("doctor.health_near_limit_ratio must be in (0, 1]"));
        }

        let i = &self.investigation;
        if i.max_rounds == 0 {
            return Err(anyhow!("investigation.max_rounds must be > 0"));
        }
        if i.max_probes_per_round == 0 {
            return Err(anyhow!("investigation.max_probes_per_round must be > 0"));
        }
        if i.preview_chars == 0 {
            return Err(anyhow!("investigation.preview_chars must be > 0"));
        }

        let dc = &self.decision;
        if dc.low_risk_threshold > dc.medium_risk_threshold {
            return Err(anyhow!(
                "decision.low_risk_threshold must not exceed decision.medium_risk_threshold"
            ));
        }
        if !(0.0..=1.0).contains(&dc.min_confidence_for_auto_fix) {
            return Err(anyhow!("decision.min_confidence_for_auto_fix must be in [0, 1]"));
        }

        if self.checkpoint.git_timeout_secs == 0 {
            return Err(anyhow!("checkpoint.git_timeout_secs must be > 0"));
        }
        if self.checkpoint.runs_dir.as_os_str().is_empty() {
            return Err(anyhow!("checkpoint.runs_dir must not be empty"));
        }
        if self.probes.timeout_secs == 0 {
            return Err(anyhow!("probes.timeout_secs must be > 0"));
        }
        if self.probes.output_limit_bytes == 0 {
            return Err(anyhow!("probes.output_limit_bytes must be > 0"));
        }
        if self.backend.command.is_empty() || self.backend.command[0].trim().is_empty() {
            return Err(anyhow!("backend.command must be a non-empty array"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using `lookup` as the environment.
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(INTENTION_CONTEXT_ENV) {
            let enabled = matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
            debug!(enabled, "intention context overridden from environment");
            self.doctor.intention_context = enabled;
        }
    }
}

/// Load config from a TOML file and apply environment overrides.
///
/// If the file is missing, returns `RecoveryConfig::default()` (plus overrides).
pub fn load_config(path: &Path) -> Result<RecoveryConfig> {
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        debug!(path = %path.display(), "config missing, using defaults");
        RecoveryConfig::default()
    };
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RecoveryConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
