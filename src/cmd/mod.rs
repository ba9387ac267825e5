//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                      |
//! |------------|---------------------------------------|
//! | `init`     | `Init`                                |
//! | `run`      | `Run`                                 |
//! | `recover`  | `Recover`, `RecoverSession`           |
//! | `snapshot` | `Snapshot`                            |
//! | `status`   | `Status`                              |
//! | `config`   | `Config`                              |
//! | `watchdog` | `EnsureRunning`                       |
//!
//! Every command returns the process exit code.

pub mod config;
pub mod init;
pub mod recover;
pub mod run;
pub mod snapshot;
pub mod status;
pub mod watchdog;

pub use config::cmd_config;
pub use init::cmd_init;
pub use recover::{cmd_recover, cmd_recover_session};
pub use run::{RunArgs, cmd_run};
pub use snapshot::cmd_snapshot;
pub use status::cmd_status;
pub use watchdog::cmd_ensure_running;

use anyhow::Result;
use conductor::clock::SharedClock;
use conductor::config::Config;
use conductor::state::{StateLock, StateStore};

/// Take the state lock and open the store. The lock is released when the
/// returned guard drops.
pub(crate) fn open_locked(config: &Config, clock: SharedClock) -> Result<(StateLock, StateStore)> {
    config.ensure_directories()?;
    let lock = StateLock::acquire(&config.lock_file)?;
    let store = StateStore::open(&config.state_file, clock)?;
    Ok((lock, store))
}
