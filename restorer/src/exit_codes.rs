//! Stable exit codes for the CLI.

/// Run completed with a result that passed every quality gate.
pub const OK: i32 = 0;
/// Invalid input/config, exhausted retry budget, or a search invariant
/// violation.
pub const FATAL: i32 = 1;
/// Run completed, but only with a compromise result (best effort so far).
pub const COMPROMISE: i32 = 2;
