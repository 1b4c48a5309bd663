//! Run status reporting
//!
//! Status is read-only: it loads the latest checkpoint and looks at the lock
//! file, but never acquires the lock or writes anything, so it is safe to call
//! while another process drives the run.

use chrono::Utc;
use serde::Serialize;

use brdflow_checkpoint::CheckpointStore;
use brdflow_lock::FileLock;
use brdflow_utils::error::BrdflowError;
use brdflow_utils::paths::RunPaths;
use brdflow_utils::types::{GateKind, PhaseId, Platform};

use crate::state::{OrchestrationState, RunStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateStatus {
    pub gate: GateKind,
    pub waited_secs: u64,
    pub timeout_secs: u64,
    pub expired: bool,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatusReport {
    pub run_id: String,
    pub platform: Platform,
    pub phase: PhaseId,
    pub phase_name: &'static str,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub total_items: usize,
    pub created: usize,
    pub verified: usize,
    pub failed: usize,
    pub unverifiable: usize,
    /// A `create_issue` was issued but its outcome is not yet recorded.
    pub write_in_flight: bool,
    pub lock_held: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub checkpoint_seq: u64,
}

impl RunStatusReport {
    #[must_use]
    pub fn from_state(state: &OrchestrationState, checkpoint_seq: u64, lock_held: bool, gate_timeout_s: u64) -> Self {
        let now = Utc::now();
        Self {
            run_id: state.run_id.clone(),
            platform: state.platform,
            phase: state.phase,
            phase_name: state.phase.as_str(),
            status: state.status,
            gate: state.awaiting_gate.as_ref().map(|g| GateStatus {
                gate: g.gate,
                waited_secs: g.waited_secs(now),
                timeout_secs: gate_timeout_s,
                expired: g.is_expired(now, gate_timeout_s),
                prompt: g.prompt.clone(),
            }),
            project: state.project.as_ref().map(|p| p.name.clone()),
            total_items: state.hierarchy.as_ref().map_or(0, |t| t.total_items()),
            created: state.created_items.len(),
            verified: state.verified_count(),
            failed: state.failed_nodes.len(),
            unverifiable: state.unverifiable_count(),
            write_in_flight: state.in_flight.is_some(),
            lock_held,
            last_error: state.last_error.clone(),
            checkpoint_seq,
        }
    }

    /// Load the status of a run from disk.
    ///
    /// # Errors
    ///
    /// [`brdflow_utils::error::CheckpointError::NotFound`] for unknown runs, or
    /// a corrupt checkpoint.
    pub fn load(paths: &RunPaths, run_id: &str, gate_timeout_s: u64) -> Result<Self, BrdflowError> {
        let record = CheckpointStore::new(paths, run_id).require_latest::<OrchestrationState>()?;
        let lock_held = FileLock::is_held(paths.root()).unwrap_or(false);
        Ok(Self::from_state(&record.state_snapshot, record.seq, lock_held, gate_timeout_s))
    }

    /// One-line human summary.
    #[must_use]
    pub fn headline(&self) -> String {
        let mut line = format!(
            "{} [{}] phase {} - {}",
            self.run_id, self.platform, self.phase, self.status
        );
        if let Some(gate) = &self.gate {
            line.push_str(&format!(", {} open {}s", gate.gate, gate.waited_secs));
            if gate.expired {
                line.push_str(" (expired)");
            }
        }
        line
    }
}
