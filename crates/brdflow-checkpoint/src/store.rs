use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};

use brdflow_utils::atomic_write::write_file_atomic;
use brdflow_utils::canonicalization::{emit_jcs, hash_jcs};
use brdflow_utils::error::CheckpointError;
use brdflow_utils::paths::{RunPaths, ensure_dir_all};
use brdflow_utils::types::PhaseId;

use crate::record::{CheckpointRecord, CheckpointRef};

/// Append-only checkpoint log for one run.
///
/// Files are named `{seq:06}-{phase}.json` and written atomically as canonical
/// JSON. The highest sequence number is authoritative; older files are kept
/// for audit.
///
/// The directory is scanned once for the highest sequence number; later
/// appends continue from the cached value. Only the lock holder appends.
pub struct CheckpointStore {
    run_id: String,
    dir: Utf8PathBuf,
    /// Last sequence written or found on disk; 0 until the first scan.
    last_seq: AtomicU64,
}

fn parse_file_name(name: &str) -> Option<(u64, &str)> {
    let stem = name.strip_suffix(".json")?;
    let (seq, phase) = stem.split_once('-')?;
    Some((seq.parse().ok()?, phase))
}

impl CheckpointStore {
    #[must_use]
    pub fn new(paths: &RunPaths, run_id: &str) -> Self {
        Self::in_dir(paths.checkpoints_dir(), run_id)
    }

    #[must_use]
    pub fn in_dir(dir: Utf8PathBuf, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            dir,
            last_seq: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Existing checkpoints as `(seq, path)`, oldest first.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Corrupt`] if the directory cannot be read.
    pub fn list(&self) -> Result<Vec<(u64, Utf8PathBuf)>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| CheckpointError::Corrupt {
            path: self.dir.to_string(),
            reason: e.to_string(),
        })?;

        let mut found = Vec::new();
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str()
                && let Some((seq, _)) = parse_file_name(name)
            {
                found.push((seq, self.dir.join(name)));
            }
        }
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found)
    }

    /// Persist `state` as the next checkpoint.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::WriteFailed`] if serialization or the atomic write fails.
    pub fn append<S: Serialize>(
        &self,
        phase: PhaseId,
        cursor: &str,
        state: &S,
    ) -> Result<CheckpointRef, CheckpointError> {
        let write_failed = |reason: String| CheckpointError::WriteFailed {
            path: self.dir.to_string(),
            reason,
        };

        ensure_dir_all(&self.dir).map_err(|e| write_failed(e.to_string()))?;
        let seq = self.next_seq()?;

        let record = CheckpointRecord {
            run_id: self.run_id.clone(),
            seq,
            phase,
            cursor: cursor.to_string(),
            timestamp: Utc::now(),
            state_hash: hash_jcs(state).map_err(|e| write_failed(e.to_string()))?,
            state_snapshot: state,
        };
        let json = emit_jcs(&record).map_err(|e| write_failed(e.to_string()))?;

        let path = self.dir.join(format!("{seq:06}-{}.json", phase.as_str()));
        write_file_atomic(&path, &json).map_err(|e| CheckpointError::WriteFailed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        self.last_seq.store(seq, Ordering::SeqCst);
        tracing::debug!(run_id = %self.run_id, seq, phase = phase.as_str(), cursor, "Checkpoint committed");
        Ok(CheckpointRef { seq, phase, path })
    }

    fn next_seq(&self) -> Result<u64, CheckpointError> {
        let mut last = self.last_seq.load(Ordering::SeqCst);
        if last == 0 {
            last = self.list()?.last().map_or(0, |(seq, _)| *seq);
            self.last_seq.store(last, Ordering::SeqCst);
        }
        Ok(last + 1)
    }

    /// Read one checkpoint file, verifying its state hash.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Corrupt`] for unreadable files, bad JSON or a hash mismatch.
    pub fn read<S: Serialize + DeserializeOwned>(
        &self,
        path: &Utf8Path,
    ) -> Result<CheckpointRecord<S>, CheckpointError> {
        let corrupt = |reason: String| CheckpointError::Corrupt {
            path: path.to_string(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| corrupt(e.to_string()))?;
        let record: CheckpointRecord<S> =
            serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;
        let actual = hash_jcs(&record.state_snapshot).map_err(|e| corrupt(e.to_string()))?;
        if actual != record.state_hash {
            return Err(corrupt(format!(
                "state hash mismatch (recorded {}, computed {actual})",
                record.state_hash
            )));
        }
        Ok(record)
    }

    /// The authoritative checkpoint, if any.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Corrupt`] if the latest file cannot be read.
    pub fn latest<S: Serialize + DeserializeOwned>(
        &self,
    ) -> Result<Option<CheckpointRecord<S>>, CheckpointError> {
        match self.list()?.last() {
            Some((_, path)) => self.read(path).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`Self::latest`] but a missing checkpoint is an error.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`] when the run has never been checkpointed.
    pub fn require_latest<S: Serialize + DeserializeOwned>(
        &self,
    ) -> Result<CheckpointRecord<S>, CheckpointError> {
        self.latest()?.ok_or_else(|| CheckpointError::NotFound {
            run_id: self.run_id.clone(),
        })
    }
}
