//! Stable exit codes for the recovery CLI.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid arguments or config, or the requested operation failed.
pub const INVALID: i32 = 1;
/// The decision needs a human (`AMBIGUOUS` or `RISKY`).
pub const HUMAN_REQUIRED: i32 = 2;
/// A rollback was attempted and did not restore the workspace.
pub const ROLLBACK_FAILED: i32 = 3;
