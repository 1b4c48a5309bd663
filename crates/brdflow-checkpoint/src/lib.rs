//! Checkpoint store for brdflow
//!
//! Every phase transition and every creation or verification step appends a
//! [`CheckpointRecord`] holding the full orchestration state. Resume reads the
//! latest record and re-enters its phase.

mod record;
mod store;

pub use record::{CheckpointRecord, CheckpointRef};
pub use store::CheckpointStore;
