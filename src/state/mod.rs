//! State Store: durable phase records, checkpoint references and free-form
//! orchestration state.
//!
//! All other components read and mutate orchestration state through
//! [`StateStore`]; nothing edits [`OrchestrationState`] fields directly
//! outside this module, which keeps persistence-on-write consistent.

mod lock;
mod record;
mod store;

pub use lock::StateLock;
pub use record::{CheckpointRef, FILES_CREATED, OrchestrationState, PhaseRecord, PhaseStatus};
pub use store::{StateStore, read_state_file};
pub(crate) use store::write_atomically;
