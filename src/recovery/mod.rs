//! Recovery paths: stuck-phase recovery and checkpoint-based session
//! recovery.

pub mod session;
pub mod stuck;

pub use session::{RECOVERY_KEY, RecoveryReport, SessionRecovery, blocking_recovery_errors};
pub use stuck::{DEFAULT_STUCK_TIMEOUT_HOURS, StuckPhase, find_stuck_phases, recover_stuck_phases};
