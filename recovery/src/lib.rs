//! Failure-recovery decision pipeline for autonomous build runs.
//!
//! When a Builder attempt fails, the executor hands the failure to this
//! crate. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (evidence, fix strategies,
//!   decision classification, gap analysis, Doctor invocation policy).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (git, probe commands, the Doctor
//!   backend, config, the run audit log), each behind a trait so tests can
//!   substitute fakes.
//!
//! Orchestration modules ([`investigation`], [`invocation`]) combine core
//! logic with I/O: the bounded evidence-gathering loop and the budget-gated
//! Doctor call with its action dispatch.

pub mod core;
pub mod exit_codes;
pub mod investigation;
pub mod invocation;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
