//! Stable exit codes for stepper CLI commands.

/// Command succeeded; for `stepper run`, the run finished without an error.
pub const OK: i32 = 0;
/// Invalid config, failed setup, or any other error before the run started.
pub const INVALID: i32 = 1;
/// `stepper run` finished with a recorded run error.
pub const FAILED: i32 = 2;
