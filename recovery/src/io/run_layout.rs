//! Per-run file layout under the runs directory (`.autonomous_runs/<run_id>/`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

pub const AUDIT_LOG_FILE: &str = "checkpoint_audit.log";
/// Written into the runs directory so git neither stages nor cleans it.
pub const RUNS_DIR_GITIGNORE: &str = "*\n";

/// One line of the checkpoint audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord<'a> {
    pub timestamp: String,
    pub run_id: &'a str,
    pub phase_id: &'a str,
    pub action: &'a str,
    pub details: &'a Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    pub runs_dir: PathBuf,
    pub dir: PathBuf,
    pub audit_log_path: PathBuf,
}

impl RunLayout {
    /// Layout for `run_id` under `runs_dir`. Fails for ids that are empty or
    /// would escape the runs directory.
    pub fn new(runs_dir: &Path, run_id: &str) -> Result<Self> {
        validate_run_id(run_id)?;
        let dir = runs_dir.join(run_id);
        Ok(Self {
            runs_dir: runs_dir.to_path_buf(),
            audit_log_path: dir.join(AUDIT_LOG_FILE),
            dir,
        })
    }

    /// Create the run directory inside a git-ignored runs directory.
    pub fn create_dir(&self) -> Result<()> {
        ensure_runs_dir(&self.runs_dir)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create run dir {}", self.dir.display()))
    }

    /// Append one JSON line to the audit log, creating the run directory as needed.
    ///
    /// The log is append-only: earlier lines are never rewritten, and the
    /// ignored runs directory survives `git clean -fd` during rollback.
    pub fn append_audit(
        &self,
        run_id: &str,
        phase_id: &str,
        action: &str,
        details: &Value,
    ) -> Result<()> {
        self.create_dir()?;
        let record = AuditRecord {
            timestamp: Utc::now().to_rfc3339(),
            run_id,
            phase_id,
            action,
            details,
        };
        let mut line = serde_json::to_string(&record).context("serialize audit record")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)
            .with_context(|| format!("open audit log {}", self.audit_log_path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append audit log {}", self.audit_log_path.display()))?;
        Ok(())
    }
}

/// Create `runs_dir` and its `.gitignore` if either is missing. An existing
/// `.gitignore` is left untouched.
pub fn ensure_runs_dir(runs_dir: &Path) -> Result<()> {
    fs::create_dir_all(runs_dir)
        .with_context(|| format!("create runs dir {}", runs_dir.display()))?;
    let ignore_path = runs_dir.join(".gitignore");
    if !ignore_path.exists() {
        fs::write(&ignore_path, RUNS_DIR_GITIGNORE)
            .with_context(|| format!("write {}", ignore_path.display()))?;
    }
    Ok(())
}

fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.trim().is_empty() {
        bail!("run id must not be empty");
    }
    if run_id == "." || run_id == ".." || run_id.contains(['/', '\\']) {
        bail!("run id '{run_id}' must be a single path component");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn layout_paths_are_stable() {
        let layout = RunLayout::new(Path::new(".autonomous_runs"), "run-1").expect("layout");
        assert_eq!(layout.dir, Path::new(".autonomous_runs/run-1"));
        assert!(layout.audit_log_path.ends_with("run-1/checkpoint_audit.log"));
    }

    #[test]
    fn rejects_unsafe_run_ids() {
        for bad in ["", "  ", "..", "a/b", "a\\b"] {
            assert!(RunLayout::new(Path::new("runs"), bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn appends_json_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = RunLayout::new(temp.path(), "run-1").expect("layout");
        layout
            .append_audit("run-1", "p1", "rollback_run", &json!({"reason": "x"}))
            .expect("append");
        layout
            .append_audit("run-1", "p2", "skip_phase", &json!({}))
            .expect("append");

        let contents = fs::read_to_string(&layout.audit_log_path).expect("read");
        let lines: Vec<Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["action"], "rollback_run");
        assert_eq!(lines[0]["details"]["reason"], "x");
        assert_eq!(lines[1]["phase_id"], "p2");
        assert!(lines[1]["timestamp"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[test]
    fn runs_dir_ignores_itself() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runs_dir = temp.path().join(".autonomous_runs");
        let layout = RunLayout::new(&runs_dir, "run-1").expect("layout");
        layout
            .append_audit("run-1", "p1", "skip_phase", &json!({}))
            .expect("append");
        assert_eq!(
            fs::read_to_string(runs_dir.join(".gitignore")).expect("read"),
            RUNS_DIR_GITIGNORE
        );

        fs::write(runs_dir.join(".gitignore"), "custom\n").expect("write");
        ensure_runs_dir(&runs_dir).expect("ensure");
        assert_eq!(
            fs::read_to_string(runs_dir.join(".gitignore")).expect("read"),
            "custom\n"
        );
    }
}
