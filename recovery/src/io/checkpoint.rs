//! Git-backed checkpoints and rollback.
//!
//! Every operation reports failure through its return value. Missing
//! repositories, a missing git binary and timeouts are expected outcomes and
//! never surface as `Err` from the outer API.
//!
//! Callers must serialize checkpoint and rollback calls per workspace.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::RunCheckpoint;
use crate::io::git::{GitOutput, GitPort};
use crate::io::run_layout::{RunLayout, ensure_runs_dir};

pub const CHECKPOINT_TAG_PREFIX: &str = "autopack-";
pub const DELETION_SAVEPOINT_PREFIX: &str = "save-before-deletion-";
/// Branch name reported by `rev-parse --abbrev-ref HEAD` when detached.
pub const DETACHED_HEAD: &str = "HEAD";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    #[error("no checkpoint commit recorded")]
    NoCheckpointCommit,
    #[error("failed to resolve current branch: {0}")]
    GitBranchFailed(String),
    #[error("failed to resolve current commit: {0}")]
    GitCommitFailed(String),
    #[error("git reset --hard failed: {0}")]
    GitResetFailed(String),
}

impl CheckpointError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCheckpointCommit => "no_checkpoint_commit",
            Self::GitBranchFailed(_) => "git_branch_failed",
            Self::GitCommitFailed(_) => "git_commit_failed",
            Self::GitResetFailed(_) => "git_reset_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointManager<G> {
    git: G,
    workspace: PathBuf,
    runs_dir: PathBuf,
}

impl<G: GitPort> CheckpointManager<G> {
    /// `runs_dir` is resolved against `workspace` when relative.
    pub fn new(git: G, workspace: impl Into<PathBuf>, runs_dir: impl AsRef<Path>) -> Self {
        let workspace = workspace.into();
        let runs_dir = workspace.join(runs_dir.as_ref());
        Self {
            git,
            workspace,
            runs_dir,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    /// Tag the current HEAD as `autopack-<run>-<phase>-<timestamp>`.
    ///
    /// Returns the tag name, or an empty string on failure. A non-empty
    /// `message` produces an annotated tag.
    #[instrument(skip_all, fields(run_id = %run_id, phase_id = %phase_id))]
    pub fn create_checkpoint(&self, run_id: &str, phase_id: &str, message: &str) -> String {
        let tag = format!(
            "{CHECKPOINT_TAG_PREFIX}{}-{}-{}",
            sanitize_ref_part(run_id),
            sanitize_ref_part(phase_id),
            timestamp()
        );
        let result = if message.trim().is_empty() {
            self.run(&["tag", &tag])
        } else {
            self.run(&["tag", "-a", &tag, "-m", message])
        };
        match result {
            Ok(_) => {
                info!(tag = %tag, "checkpoint created");
                tag
            }
            Err(err) => {
                warn!(tag = %tag, err = %err, "failed to create checkpoint");
                String::new()
            }
        }
    }

    /// Hard-reset the workspace to `checkpoint_id`.
    #[instrument(skip_all, fields(checkpoint_id = %checkpoint_id))]
    pub fn rollback_to_checkpoint(&self, checkpoint_id: &str) -> bool {
        if checkpoint_id.trim().is_empty() {
            warn!("refusing rollback without a checkpoint id");
            return false;
        }
        match self.run(&["reset", "--hard", checkpoint_id]) {
            Ok(_) => {
                info!(checkpoint_id, "rolled back to checkpoint");
                true
            }
            Err(err) => {
                warn!(checkpoint_id, err = %err, "rollback to checkpoint failed");
                false
            }
        }
    }

    /// Capture the current branch and commit as the run's home state.
    #[instrument(skip_all)]
    pub fn create_run_checkpoint(&self) -> Result<RunCheckpoint, CheckpointError> {
        let branch = self
            .run(&["rev-parse", "--abbrev-ref", "HEAD"])
            .map_err(CheckpointError::GitBranchFailed)?;
        let commit = self
            .run(&["rev-parse", "HEAD"])
            .map_err(CheckpointError::GitCommitFailed)?;
        let checkpoint = RunCheckpoint {
            branch: branch.stdout.trim().to_string(),
            commit: commit.stdout.trim().to_string(),
        };
        info!(branch = %checkpoint.branch, commit = %checkpoint.commit, "run checkpoint captured");
        Ok(checkpoint)
    }

    /// Restore the run's home state.
    ///
    /// Only the hard reset decides success. `clean -fd` and the branch
    /// checkout are best effort, and the checkout is skipped for a detached
    /// checkpoint.
    #[instrument(skip_all, fields(branch = %branch, commit = %commit, reason = %reason))]
    pub fn rollback_to_run_checkpoint(
        &self,
        branch: &str,
        commit: &str,
        reason: &str,
    ) -> Result<(), CheckpointError> {
        if commit.trim().is_empty() {
            warn!("no run checkpoint commit, skipping rollback");
            return Err(CheckpointError::NoCheckpointCommit);
        }
        self.protect_runs_dir();
        self.run(&["reset", "--hard", commit])
            .map_err(CheckpointError::GitResetFailed)?;
        info!(commit, reason, "workspace reset to run checkpoint");

        if let Err(err) = self.run(&["clean", "-fd"]) {
            warn!(err = %err, "git clean after rollback failed");
        }
        if !branch.is_empty() && branch != DETACHED_HEAD {
            if let Err(err) = self.run(&["checkout", branch]) {
                warn!(branch, err = %err, "checkout after rollback failed");
            }
        } else {
            debug!("run checkpoint is detached, leaving HEAD in place");
        }
        Ok(())
    }

    /// Save the tree before a deletion-heavy change.
    ///
    /// Uncommitted changes are committed first; a clean tree is tagged as is,
    /// with no empty commit. Returns the tag name.
    #[instrument(
        skip_all,
        fields(phase_id = %phase_id, run_id = %run_id, net_deletion = net_deletion)
    )]
    pub fn create_deletion_savepoint(
        &self,
        phase_id: &str,
        run_id: &str,
        net_deletion: i64,
    ) -> Option<String> {
        let message = format!(
            "[Autopack] Save point before deletion in phase {phase_id} \
             (run {run_id}, net deletion {net_deletion})"
        );
        match self.commit_all(&message) {
            Ok(committed) => debug!(committed, "savepoint tree state recorded"),
            Err(err) => {
                warn!(err = %err, "failed to commit before deletion savepoint");
                return None;
            }
        }
        let tag = format!(
            "{DELETION_SAVEPOINT_PREFIX}{}-{}",
            sanitize_ref_part(phase_id),
            timestamp()
        );
        match self.run(&["tag", &tag]) {
            Ok(_) => {
                info!(tag = %tag, "deletion savepoint created");
                Some(tag)
            }
            Err(err) => {
                warn!(tag = %tag, err = %err, "failed to tag deletion savepoint");
                None
            }
        }
    }

    /// Commit the tree before an automated `execute_fix` action.
    #[instrument(skip_all, fields(phase_id = %phase_id))]
    pub fn create_execute_fix_checkpoint(&self, phase_id: &str) -> bool {
        let message = format!("[Autopack] Checkpoint before execute_fix for phase {phase_id}");
        match self.commit_all(&message) {
            Ok(committed) => {
                info!(committed, "execute_fix checkpoint ready");
                true
            }
            Err(err) => {
                warn!(err = %err, "execute_fix checkpoint failed");
                false
            }
        }
    }

    /// Checkpoint tags for `run_id`, sorted.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub fn list_checkpoints(&self, run_id: &str) -> Vec<String> {
        let pattern = format!("{CHECKPOINT_TAG_PREFIX}{}-*", sanitize_ref_part(run_id));
        match self.run(&["tag", "-l", &pattern]) {
            Ok(out) => {
                let mut tags: Vec<String> = out
                    .stdout
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect();
                tags.sort();
                tags
            }
            Err(err) => {
                warn!(err = %err, "failed to list checkpoints");
                Vec::new()
            }
        }
    }

    /// Append an entry to `<runs_dir>/<run_id>/checkpoint_audit.log`.
    pub fn write_audit_log(
        &self,
        run_id: &str,
        phase_id: &str,
        action: &str,
        details: &Value,
    ) -> bool {
        let result = RunLayout::new(&self.runs_dir, run_id)
            .and_then(|layout| layout.append_audit(run_id, phase_id, action, details));
        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    run_id,
                    phase_id,
                    action,
                    err = %format!("{err:#}"),
                    "failed to write audit log"
                );
                false
            }
        }
    }

    /// Stage everything and commit. `Ok(false)` means there was nothing to commit.
    fn commit_all(&self, message: &str) -> Result<bool, String> {
        self.protect_runs_dir();
        self.run(&["add", "-A"])?;
        let out = self.exec(&["commit", "-m", message])?;
        if out.success() {
            return Ok(true);
        }
        if is_nothing_to_commit(&out) {
            return Ok(false);
        }
        Err(format!("git commit failed: {}", out.message()))
    }

    /// Git-ignore the runs directory before `add -A` or `clean -fd` can reach it.
    /// Skipped when the workspace itself does not exist.
    fn protect_runs_dir(&self) {
        if !self.workspace.is_dir() {
            return;
        }
        if let Err(err) = ensure_runs_dir(&self.runs_dir) {
            warn!(
                runs_dir = %self.runs_dir.display(),
                err = %format!("{err:#}"),
                "failed to git-ignore runs dir"
            );
        }
    }

    /// Run git and require a zero exit code.
    fn run(&self, args: &[&str]) -> Result<GitOutput, String> {
        let out = self.exec(args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(format!("git {} failed: {}", args.join(" "), out.message()))
        }
    }

    fn exec(&self, args: &[&str]) -> Result<GitOutput, String> {
        self.git
            .exec(&self.workspace, args)
            .map_err(|err| format!("{err:#}"))
    }
}

fn is_nothing_to_commit(out: &GitOutput) -> bool {
    ["nothing to commit", "nothing added to commit"]
        .iter()
        .any(|needle| out.stdout.contains(needle) || out.stderr.contains(needle))
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}

/// Replace characters git refuses in tag names.
fn sanitize_ref_part(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
