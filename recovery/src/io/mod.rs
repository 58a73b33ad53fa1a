//! Side-effecting adapters for the recovery pipeline.
//!
//! Every external collaborator (git, probe commands, the Doctor agent, the
//! executor's persistence) sits behind a trait here so the orchestration
//! modules can be tested with scripted fakes.

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod git;
pub mod hooks;
pub mod probes;
pub mod process;
pub mod run_layout;
