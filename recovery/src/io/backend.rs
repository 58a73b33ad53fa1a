//! Diagnostic backend abstraction for Doctor calls.
//!
//! The [`DiagnosticBackend`] trait decouples the invocation gate from the
//! agent that actually diagnoses failures (currently `codex exec`). Tests use
//! scripted backends that return predetermined responses.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use jsonschema::validator_for;
use minijinja::{Environment, context};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::doctor::{
    ContextSummary, DoctorRequest, DoctorResponse, ModelTier, choose_model_tier,
};
use crate::io::config::BackendConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::run_layout::RunLayout;

const DOCTOR_TEMPLATE: &str = include_str!("prompts/doctor.md");
const DOCTOR_RESPONSE_SCHEMA: &str = include_str!("prompts/doctor_response.schema.json");
const DOCTOR_DIR: &str = "doctor";

/// Abstraction over Doctor backends.
pub trait DiagnosticBackend {
    /// Diagnose a failure. `allow_escalation` permits routing to the strong
    /// model; the returned response reports the tier actually used.
    fn execute_doctor(
        &self,
        request: &DoctorRequest,
        context: &ContextSummary,
        allow_escalation: bool,
    ) -> Result<DoctorResponse>;
}

impl<B: DiagnosticBackend + ?Sized> DiagnosticBackend for &B {
    fn execute_doctor(
        &self,
        request: &DoctorRequest,
        context: &ContextSummary,
        allow_escalation: bool,
    ) -> Result<DoctorResponse> {
        (**self).execute_doctor(request, context, allow_escalation)
    }
}

/// Backend that runs the configured agent CLI (`codex exec` by default).
///
/// Prompts and responses are kept under `<runs_dir>/<run_id>/doctor/`.
#[derive(Debug, Clone)]
pub struct CodexDoctorBackend {
    config: BackendConfig,
    workspace: PathBuf,
    runs_dir: PathBuf,
}

impl CodexDoctorBackend {
    /// `runs_dir` is resolved against `workspace` when relative.
    pub fn new(
        config: BackendConfig,
        workspace: impl Into<PathBuf>,
        runs_dir: impl AsRef<Path>,
    ) -> Self {
        let workspace = workspace.into();
        let runs_dir = workspace.join(runs_dir.as_ref());
        Self {
            config,
            workspace,
            runs_dir,
        }
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Cheap => &self.config.cheap_model,
            ModelTier::Strong => &self.config.strong_model,
        }
    }
}

impl DiagnosticBackend for CodexDoctorBackend {
    #[instrument(skip_all, fields(run_id = %request.run_id, phase_id = %request.phase_id))]
    fn execute_doctor(
        &self,
        request: &DoctorRequest,
        context: &ContextSummary,
        allow_escalation: bool,
    ) -> Result<DoctorResponse> {
        let tier = choose_model_tier(context, allow_escalation);
        let model = self.model_for(tier);
        info!(?tier, model, "invoking doctor");

        let layout = RunLayout::new(&self.runs_dir, &request.run_id)?;
        layout.create_dir()?;
        let dir = layout.dir.join(DOCTOR_DIR);
        fs::create_dir_all(&dir).with_context(|| format!("create doctor dir {}", dir.display()))?;
        let stem = format!(
            "{}-{}",
            request.phase_id.replace(['/', '\\'], "_"),
            Utc::now().format("%Y%m%dT%H%M%S%3fZ")
        );
        let schema_path = dir.join("doctor_response.schema.json");
        fs::write(&schema_path, DOCTOR_RESPONSE_SCHEMA)
            .with_context(|| format!("write schema {}", schema_path.display()))?;
        let prompt = render_prompt(request, context)?;
        let prompt_path = dir.join(format!("{stem}.prompt.md"));
        fs::write(&prompt_path, &prompt)
            .with_context(|| format!("write prompt {}", prompt_path.display()))?;
        let output_path = dir.join(format!("{stem}.response.json"));

        let (program, base_args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("backend.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(base_args)
            .arg("--model")
            .arg(model)
            .arg("--sandbox")
            .arg("read-only")
            .arg("--skip-git-repo-check")
            .arg("--output-schema")
            .arg(&schema_path)
            .arg("--output-last-message")
            .arg(&output_path)
            .arg("-")
            .current_dir(&self.workspace);

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            timeout,
            self.config.output_limit_bytes,
        )
        .context("run doctor backend")?;
        if output.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "doctor backend timed out");
            return Err(anyhow!("doctor backend timed out after {timeout:?}"));
        }
        if !output.success() {
            warn!(exit_code = ?output.exit_code(), "doctor backend failed");
            return Err(anyhow!(
                "doctor backend failed with status {:?}: {}",
                output.exit_code(),
                output.stderr_text().trim()
            ));
        }

        let contents = fs::read_to_string(&output_path)
            .with_context(|| format!("read doctor response {}", output_path.display()))?;
        let response = parse_response(&contents, tier)
            .with_context(|| format!("parse doctor response {}", output_path.display()))?;
        debug!(action = %response.action, confidence = response.confidence, "doctor responded");
        Ok(response)
    }
}

/// Render the Doctor prompt for a request.
pub fn render_prompt(request: &DoctorRequest, summary: &ContextSummary) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("doctor", DOCTOR_TEMPLATE)
        .context("load doctor template")?;
    let template = env.get_template("doctor")?;
    let rendered = template
        .render(context! {
            request => request,
            context => summary,
        })
        .context("render doctor prompt")?;
    Ok(rendered)
}

/// Validate a raw backend reply against the response schema and parse it.
pub fn parse_response(raw: &str, tier: ModelTier) -> Result<DoctorResponse> {
    let value: Value = serde_json::from_str(raw).context("parse json")?;
    let schema: Value =
        serde_json::from_str(DOCTOR_RESPONSE_SCHEMA).context("parse doctor response schema")?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "doctor response schema validation failed: {}",
            messages.join("; ")
        ));
    }
    let mut response: DoctorResponse =
        serde_json::from_value(value).context("deserialize doctor response")?;
    response.model_tier = tier;
    Ok(response)
}
