pub mod checkpoint;
pub mod clock;
pub mod conductor_config;
pub mod config;
pub mod criteria;
pub mod errors;
pub mod exit_codes;
pub mod guard;
pub mod init;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod phase;
pub mod recovery;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod timeout;
pub mod ui;
