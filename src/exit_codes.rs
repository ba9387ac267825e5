//! Process exit codes for the `conductor` binary.

/// Every phase of the plan is complete.
pub const SUCCESS: i32 = 0;
/// An error escaped the command, including a corrupt state file at startup.
pub const HARD_FAILURE: i32 = 1;
/// At least one phase failed.
pub const PHASE_FAILED: i32 = 2;
/// Stopped without a failure: a phase is still in progress, the operator
/// declined a phase, or a single-phase run targeted a blocked phase.
pub const INCOMPLETE: i32 = 3;
/// Another orchestrator holds the state lock.
pub const LOCK_HELD: i32 = 4;
