use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brdflow_utils::types::PhaseId;

/// One persisted snapshot of orchestration state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord<S> {
    pub run_id: String,
    pub seq: u64,
    pub phase: PhaseId,
    /// Position within the phase, e.g. `level 3` or `gate_b`.
    pub cursor: String,
    pub timestamp: DateTime<Utc>,
    /// BLAKE3 over the canonical JSON of `state_snapshot`.
    pub state_hash: String,
    pub state_snapshot: S,
}

/// Where a checkpoint landed; carried in failure reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub seq: u64,
    pub phase: PhaseId,
    pub path: Utf8PathBuf,
}

impl std::fmt::Display for CheckpointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}
