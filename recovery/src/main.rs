//! Failure-recovery CLI.
//!
//! Exposes the decision classifier, the investigation loop and the git
//! checkpoint primitives so the executor (or a human) can drive them from
//! the shell. JSON in, JSON out.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use autopack_recovery::core::decision::DecisionMaker;
use autopack_recovery::core::evidence::EvidenceBundle;
use autopack_recovery::core::types::{Decision, DecisionType, FailureContext, Phase};
use autopack_recovery::exit_codes;
use autopack_recovery::investigation::InvestigationLoop;
use autopack_recovery::io::checkpoint::CheckpointManager;
use autopack_recovery::io::config::{DEFAULT_CONFIG_PATH, RecoveryConfig, load_config};
use autopack_recovery::io::git::SystemGit;
use autopack_recovery::io::probes::CommandProbeRunner;
use autopack_recovery::logging;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "autopack-recovery",
    version,
    about = "Failure-recovery decisions and git checkpoints for autonomous runs"
)]
struct Cli {
    /// Workspace (git working tree) to operate on.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,
    /// Config file, relative to the workspace unless absolute.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify an evidence bundle for a phase.
    Decide {
        /// Evidence bundle JSON (object of named entries).
        #[arg(long)]
        evidence: PathBuf,
        /// Phase JSON.
        #[arg(long)]
        phase: PathBuf,
    },
    /// Run the multi-round investigation for a failure.
    Investigate {
        /// Failure context JSON.
        #[arg(long)]
        failure: PathBuf,
        /// Phase JSON.
        #[arg(long)]
        phase: PathBuf,
    },
    /// Tag-based checkpoints.
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
    /// Branch + commit checkpoint for a whole run.
    RunCheckpoint {
        #[command(subcommand)]
        command: RunCheckpointCommand,
    },
    /// Commit and tag the tree before a deletion-heavy change.
    Savepoint {
        #[arg(long)]
        run: String,
        #[arg(long)]
        phase: String,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        net_deletion: i64,
    },
    /// Commit the tree before an automated fix.
    FixCheckpoint {
        #[arg(long)]
        phase: String,
    },
    /// Append an entry to the run's checkpoint audit log.
    Audit {
        #[arg(long)]
        run: String,
        #[arg(long)]
        phase: String,
        #[arg(long)]
        action: String,
        /// Details as a JSON value.
        #[arg(long, default_value = "{}")]
        details: String,
    },
}

#[derive(Subcommand)]
enum CheckpointCommand {
    /// Tag the current commit and print the tag.
    Create {
        #[arg(long)]
        run: String,
        #[arg(long)]
        phase: String,
        /// Annotation message; a lightweight tag is created when empty.
        #[arg(long, default_value = "")]
        message: String,
    },
    /// Hard-reset the workspace to a checkpoint tag.
    Rollback { checkpoint: String },
    /// Print the run's checkpoint tags.
    List {
        #[arg(long)]
        run: String,
    },
}

#[derive(Subcommand)]
enum RunCheckpointCommand {
    /// Print the current branch and commit as JSON.
    Create,
    /// Restore a branch + commit pair.
    Rollback {
        #[arg(long)]
        branch: String,
        #[arg(long)]
        commit: String,
        #[arg(long, default_value = "manual rollback")]
        reason: String,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = if cli.config.is_absolute() {
        cli.config.clone()
    } else {
        cli.workspace.join(&cli.config)
    };
    let config = load_config(&config_path)?;
    let workspace = cli.workspace;

    match cli.command {
        Command::Decide { evidence, phase } => {
            let evidence: EvidenceBundle = read_json(&evidence)?;
            let phase: Phase = read_json(&phase)?;
            let decision = DecisionMaker::new(config.decision)
                .with_workspace(&workspace)
                .make_decision(&evidence, &phase);
            print_json(&decision)?;
            Ok(decision_exit_code(&decision))
        }
        Command::Investigate { failure, phase } => {
            let failure: FailureContext = read_json(&failure)?;
            let phase: Phase = read_json(&phase)?;
            let result = investigate(&config, &workspace, &failure, &phase);
            print_json(&result)?;
            Ok(decision_exit_code(&result.decision))
        }
        Command::Checkpoint { command } => {
            let manager = checkpoints(&config, workspace);
            match command {
                CheckpointCommand::Create {
                    run,
                    phase,
                    message,
                } => {
                    let tag = manager.create_checkpoint(&run, &phase, &message);
                    if tag.is_empty() {
                        return Ok(exit_codes::INVALID);
                    }
                    println!("{tag}");
                    Ok(exit_codes::OK)
                }
                CheckpointCommand::Rollback { checkpoint } => {
                    if manager.rollback_to_checkpoint(&checkpoint) {
                        Ok(exit_codes::OK)
                    } else {
                        Ok(exit_codes::ROLLBACK_FAILED)
                    }
                }
                CheckpointCommand::List { run } => {
                    for tag in manager.list_checkpoints(&run) {
                        println!("{tag}");
                    }
                    Ok(exit_codes::OK)
                }
            }
        }
        Command::RunCheckpoint { command } => {
            let manager = checkpoints(&config, workspace);
            match command {
                RunCheckpointCommand::Create => match manager.create_run_checkpoint() {
                    Ok(checkpoint) => {
                        print_json(&checkpoint)?;
                        Ok(exit_codes::OK)
                    }
                    Err(err) => {
                        eprintln!("{}: {err}", err.code());
                        Ok(exit_codes::INVALID)
                    }
                },
                RunCheckpointCommand::Rollback {
                    branch,
                    commit,
                    reason,
                } => match manager.rollback_to_run_checkpoint(&branch, &commit, &reason) {
                    Ok(()) => Ok(exit_codes::OK),
                    Err(err) => {
                        eprintln!("{}: {err}", err.code());
                        Ok(exit_codes::ROLLBACK_FAILED)
                    }
                },
            }
        }
        Command::Savepoint {
            run,
            phase,
            net_deletion,
        } => {
            let manager = checkpoints(&config, workspace);
            match manager.create_deletion_savepoint(&phase, &run, net_deletion) {
                Some(tag) => {
                    println!("{tag}");
                    Ok(exit_codes::OK)
                }
                None => Ok(exit_codes::INVALID),
            }
        }
        Command::FixCheckpoint { phase } => {
            let manager = checkpoints(&config, workspace);
            if manager.create_execute_fix_checkpoint(&phase) {
                Ok(exit_codes::OK)
            } else {
                Ok(exit_codes::INVALID)
            }
        }
        Command::Audit {
            run,
            phase,
            action,
            details,
        } => {
            let details: Value = serde_json::from_str(&details).context("parse --details json")?;
            let manager = checkpoints(&config, workspace);
            if manager.write_audit_log(&run, &phase, &action, &details) {
                Ok(exit_codes::OK)
            } else {
                Ok(exit_codes::INVALID)
            }
        }
    }
}

fn investigate(
    config: &RecoveryConfig,
    workspace: &Path,
    failure: &FailureContext,
    phase: &Phase,
) -> autopack_recovery::core::types::InvestigationResult {
    let runner = CommandProbeRunner::new(
        workspace,
        config.probes.clone(),
        config.investigation.preview_chars,
    );
    let policy = DecisionMaker::new(config.decision.clone()).with_workspace(workspace);
    InvestigationLoop::new(runner, policy, config.investigation.clone()).investigate(failure, phase)
}

fn checkpoints(config: &RecoveryConfig, workspace: PathBuf) -> CheckpointManager<SystemGit> {
    CheckpointManager::new(
        SystemGit::new(config.checkpoint.git_timeout()),
        workspace,
        &config.checkpoint.runs_dir,
    )
}

fn decision_exit_code(decision: &Decision) -> i32 {
    match decision.decision_type {
        DecisionType::ClearFix | DecisionType::NeedMoreEvidence => exit_codes::OK,
        DecisionType::Ambiguous | DecisionType::Risky => exit_codes::HUMAN_REQUIRED,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

/// Print `value` as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
