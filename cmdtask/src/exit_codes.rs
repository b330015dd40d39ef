//! Stable exit codes for cmdtask CLI commands.

/// Every command ran and exited with code 0.
pub const OK: i32 = 0;
/// Invalid config or arguments, or a command could not be launched.
pub const INVALID: i32 = 1;
/// At least one command exited with a non-zero code.
pub const COMMAND_FAILED: i32 = 2;
/// At least one command was cancelled by `--timeout`.
pub const TIMED_OUT: i32 = 124;
