//! Run artifacts
//!
//! Every tool call drained from the gateway is appended to `trace.jsonl` in
//! the run directory at each checkpoint commit, so the trace survives
//! interruption and resume. Closing a run (or failing it) renders the files
//! under `artifacts/`:
//!
//! - `summary.md`: hierarchy with created keys and verification outcome
//! - `trace.json`: every tool call plus per-item verification
//! - `metrics.json`: counts and tool-call latency distribution
//! - `hierarchy.json`: the tree in wire form
//! - `recovery.json`: what succeeded, failed and remains (partial or failed runs)
//! - `report.json`: the failure report (failed runs)
//!
//! JSON artifacts are written as canonical JSON (JCS).

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{Read as _, Seek as _, SeekFrom, Write as _};

use brdflow_checkpoint::CheckpointRef;
use brdflow_gateway::TraceEntry;
use brdflow_hierarchy::{HierarchyNode, WireHierarchy};
use brdflow_utils::atomic_write::write_file_atomic;
use brdflow_utils::canonicalization::emit_jcs;
use brdflow_utils::error::BrdflowError;
use brdflow_utils::exit_codes::error_to_exit_code_and_kind;
use brdflow_utils::paths::RunPaths;
use brdflow_utils::types::{ErrorKind, PhaseId};

use crate::state::{BatchCheck, CompensationRecord, OrchestrationState, RunStatus};

const TRACE_LOG: &str = "trace.jsonl";

pub const SUMMARY: &str = "summary.md";
pub const TRACE: &str = "trace.json";
pub const METRICS: &str = "metrics.json";
pub const HIERARCHY: &str = "hierarchy.json";
pub const RECOVERY: &str = "recovery.json";
pub const REPORT: &str = "report.json";

/// Append drained trace entries to the run's trace log.
///
/// A torn last line left by a crash is terminated first so the new entries
/// start on a line of their own.
pub fn append_trace(paths: &RunPaths, entries: &[TraceEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let path = paths.root().join(TRACE_LOG);
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open trace log {path}"))?;
    let mut buf = String::new();
    if ends_mid_line(&mut file).with_context(|| format!("Failed to read trace log {path}"))? {
        buf.push('\n');
    }
    for entry in entries {
        buf.push_str(&serde_json::to_string(entry).context("Failed to serialize trace entry")?);
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())
        .with_context(|| format!("Failed to append to trace log {path}"))
}

fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

/// Every traced call of the run, ordered by tool call id.
///
/// Lines that fail to parse (a torn write at a crash) are skipped.
pub fn read_trace(paths: &RunPaths) -> Result<Vec<TraceEntry>> {
    let path = paths.root().join(TRACE_LOG);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read trace log {path}")),
    };
    let mut by_id: BTreeMap<u64, TraceEntry> = BTreeMap::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<TraceEntry>(line) {
            Ok(entry) => {
                by_id.insert(entry.tool_call_id, entry);
            }
            Err(e) => tracing::warn!(error = %e, "Skipping unreadable trace line"),
        }
    }
    Ok(by_id.into_values().collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub p50: u64,
    pub p95: u64,
    pub max: u64,
    pub mean: f64,
}

impl LatencyStats {
    /// Nearest-rank percentiles over the samples.
    #[must_use]
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self {
                p50: 0,
                p95: 0,
                max: 0,
                mean: 0.0,
            };
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let rank = |q: f64| {
            let idx = (q * sorted.len() as f64).ceil() as usize;
            sorted[idx.clamp(1, sorted.len()) - 1]
        };
        Self {
            p50: rank(0.50),
            p95: rank(0.95),
            max: sorted[sorted.len() - 1],
            mean: sorted.iter().sum::<u64>() as f64 / sorted.len() as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub run_id: String,
    pub status: RunStatus,
    pub total_items: usize,
    pub created: usize,
    pub verified: usize,
    pub failed: usize,
    pub unverifiable: usize,
    pub tool_calls: usize,
    pub retries: u64,
    pub latency_ms: LatencyStats,
    /// Tool calls per operation.
    pub operations: BTreeMap<String, usize>,
}

impl Metrics {
    #[must_use]
    pub fn compute(state: &OrchestrationState, trace: &[TraceEntry]) -> Self {
        let latencies: Vec<u64> = trace.iter().map(|e| e.latency_ms).collect();
        let mut operations = BTreeMap::new();
        for entry in trace {
            *operations.entry(entry.operation.name().to_string()).or_insert(0) += 1;
        }
        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            total_items: state.hierarchy.as_ref().map_or(0, |t| t.total_items()),
            created: state.created_items.len(),
            verified: state.verified_count(),
            failed: state.failed_nodes.len(),
            unverifiable: state.unverifiable_count(),
            tool_calls: trace.len(),
            retries: state.retry_counts.values().map(|r| u64::from(*r)).sum(),
            latency_ms: LatencyStats::from_samples(&latencies),
            operations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VerificationEntry {
    key: String,
    trace_id: String,
    verified: bool,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TraceDocument {
    run_id: String,
    entries: Vec<TraceEntry>,
    verification: Vec<VerificationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_check: Option<BatchCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryItem {
    pub trace_id: String,
    pub title: String,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Exactly which nodes succeeded, failed and remain uncreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub run_id: String,
    pub status: RunStatus,
    pub phase: PhaseId,
    pub succeeded: Vec<RecoveryItem>,
    pub failed: Vec<RecoveryItem>,
    pub remaining: Vec<RecoveryItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationRecord>,
    pub resume: String,
}

impl RecoveryReport {
    #[must_use]
    pub fn from_state(state: &OrchestrationState) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut remaining = Vec::new();

        if let Some(tree) = &state.hierarchy {
            for r in tree.bfs() {
                let node = r.node;
                let item = |key: Option<String>, reason: Option<String>| RecoveryItem {
                    trace_id: node.trace_id.clone(),
                    title: node.title.clone(),
                    depth: r.depth,
                    key,
                    reason,
                };
                if let Some(created) = state.created_item(&node.trace_id) {
                    succeeded.push(item(Some(created.key.clone()), created.unverifiable.clone()));
                } else if let Some(f) = state.failed_nodes.iter().find(|f| f.trace_id == node.trace_id) {
                    failed.push(item(None, Some(format!("{} (code {})", f.message, f.code))));
                } else {
                    remaining.push(item(None, None));
                }
            }
        }

        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            phase: state.phase,
            succeeded,
            failed,
            remaining,
            compensation: state.compensation.clone(),
            resume: format!("brdflow resume {}", state.run_id),
        }
    }
}

/// Failure report written when a run stops unrecoverably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub status: RunStatus,
    pub phase: PhaseId,
    pub code: i32,
    pub kind: ErrorKind,
    pub message: String,
    pub checkpoint_ref: Option<CheckpointPointer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPointer {
    pub seq: u64,
    pub path: String,
}

impl FailureReport {
    #[must_use]
    pub fn new(state: &OrchestrationState, error: &BrdflowError, checkpoint: Option<&CheckpointRef>) -> Self {
        let (code, kind) = error_to_exit_code_and_kind(error);
        Self {
            status: state.status,
            phase: state.phase,
            code: code.as_i32(),
            kind,
            message: brdflow_redaction::redact_user_string(&error.to_string()),
            checkpoint_ref: checkpoint.map(|c| CheckpointPointer {
                seq: c.seq,
                path: c.path.to_string(),
            }),
        }
    }
}

fn write_jcs<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), BrdflowError> {
    let json = emit_jcs(value).map_err(|e| BrdflowError::CanonicalizationFailed {
        context: path.to_string(),
        reason: e.to_string(),
    })?;
    write_text(path, &json)
}

fn write_text(path: &Utf8Path, content: &str) -> Result<(), BrdflowError> {
    write_file_atomic(path, content).map_err(|e| BrdflowError::ArtifactWriteFailed {
            path: path.to_string(),
            reason: format!("{e:#}"),
        })
}

fn load_trace(paths: &RunPaths) -> Vec<TraceEntry> {
    read_trace(paths).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Trace log unreadable, artifacts will omit tool calls");
        Vec::new()
    })
}

fn trace_document(state: &OrchestrationState, entries: Vec<TraceEntry>) -> TraceDocument {
    TraceDocument {
        run_id: state.run_id.clone(),
        entries,
        verification: state
            .created_items
            .iter()
            .map(|i| VerificationEntry {
                key: i.key.clone(),
                trace_id: i.trace_id.clone(),
                verified: i.verified,
                attempts: i.verify_attempts,
                reason: i.unverifiable.clone(),
            })
            .collect(),
        batch_check: state.batch_check,
    }
}

/// Write `recovery.json` for the current state.
pub fn write_recovery(paths: &RunPaths, state: &OrchestrationState) -> Result<(), BrdflowError> {
    write_jcs(&paths.artifact(RECOVERY), &RecoveryReport::from_state(state))
}

/// Write the artifact set of a closed run.
pub fn write_run_artifacts(paths: &RunPaths, state: &OrchestrationState) -> Result<Metrics, BrdflowError> {
    let trace = load_trace(paths);
    let metrics = Metrics::compute(state, &trace);

    write_text(&paths.artifact(SUMMARY), &render_summary(state, &metrics))?;
    write_jcs(&paths.artifact(METRICS), &metrics)?;
    write_jcs(&paths.artifact(TRACE), &trace_document(state, trace))?;
    if let Some(tree) = &state.hierarchy {
        write_jcs(&paths.artifact(HIERARCHY), &WireHierarchy::from(tree))?;
    }
    if state.status == RunStatus::Partial {
        write_recovery(paths, state)?;
    }
    tracing::info!(dir = %paths.artifacts_dir(), "Run artifacts written");
    Ok(metrics)
}

/// Write the failure report, recovery artifact and trace of a stopped run.
pub fn write_failure_artifacts(paths: &RunPaths, state: &OrchestrationState, report: &FailureReport) -> Result<(), BrdflowError> {
    write_jcs(&paths.artifact(REPORT), report)?;
    write_recovery(paths, state)?;
    write_jcs(&paths.artifact(TRACE), &trace_document(state, load_trace(paths)))
}

fn render_node(out: &mut String, state: &OrchestrationState, node: &HierarchyNode, indent: usize) {
    let outcome = match state.created_item(&node.trace_id) {
        Some(item) if item.verified => format!("{} ✓", item.key),
        Some(item) => format!(
            "{} (unverified: {})",
            item.key,
            item.unverifiable.as_deref().unwrap_or("pending")
        ),
        None if state.failed_nodes.iter().any(|f| f.trace_id == node.trace_id) => "FAILED".to_string(),
        None => "not created".to_string(),
    };
    let nfr = if node.is_nfr() { " [nfr]" } else { "" };
    let _ = writeln!(
        out,
        "{}- **{}** {}{} `{}` → {}",
        "  ".repeat(indent),
        node.level,
        node.title,
        nfr,
        node.trace_id,
        outcome
    );
    for child in &node.children {
        render_node(out, state, child, indent + 1);
    }
}

/// Human-readable run summary.
#[must_use]
pub fn render_summary(state: &OrchestrationState, metrics: &Metrics) -> String {
    let mut out = String::new();
    let title = state.brd_title.as_deref().unwrap_or(&state.project_name);
    let _ = writeln!(out, "# {title}\n");
    let _ = writeln!(out, "- Run: `{}`", state.run_id);
    let _ = writeln!(out, "- Platform: {}", state.platform);
    if let Some(org) = &state.organization {
        let _ = writeln!(out, "- Organization: {}", org.name);
    }
    if let Some(project) = &state.project {
        let _ = writeln!(out, "- Project: {} ({})", project.name, project.key);
    }
    let _ = writeln!(out, "- Status: {}", state.status);
    if let Some(parse) = &state.parse {
        let low = if parse.low_confidence { ", low confidence" } else { "" };
        let _ = writeln!(
            out,
            "- Parse: {} requirements via {} at {:.2}{low}",
            parse.requirements.len(),
            parse.parser,
            parse.confidence
        );
    }
    let _ = writeln!(
        out,
        "- Items: {} created, {} verified, {} failed, {} unverifiable of {}",
        metrics.created, metrics.verified, metrics.failed, metrics.unverifiable, metrics.total_items
    );
    let _ = writeln!(
        out,
        "- Tool calls: {} (p50 {}ms, p95 {}ms, max {}ms)\n",
        metrics.tool_calls, metrics.latency_ms.p50, metrics.latency_ms.p95, metrics.latency_ms.max
    );

    if let Some(tree) = &state.hierarchy {
        let _ = writeln!(out, "## Hierarchy\n");
        for root in &tree.roots {
            render_node(&mut out, state, root, 0);
        }
    }

    if !state.failed_nodes.is_empty() {
        let _ = writeln!(out, "\n## Failures\n");
        for f in &state.failed_nodes {
            let _ = writeln!(out, "- `{}` {}: {} (code {})", f.trace_id, f.title, f.message, f.code);
        }
    }
    if let Some(c) = &state.compensation {
        let _ = writeln!(
            out,
            "\n## Compensation\n\n{} of {} writes failed at level {}; policy `{}` deleted {} and marked {} item(s).",
            c.failed,
            c.attempted,
            c.depth,
            c.policy,
            c.deleted.len(),
            c.marked.len()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use brdflow_gateway::Operation;
    use brdflow_utils::types::Platform;
    use camino::Utf8PathBuf;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(id: u64, latency_ms: u64) -> TraceEntry {
        TraceEntry {
            tool_call_id: id,
            operation: Operation::GetIssue,
            payload: json!({"key": "1001"}),
            response: json!({"key": "1001"}),
            code: 0,
            attempts: 1,
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    fn paths(tmp: &TempDir) -> RunPaths {
        let home = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap();
        let paths = RunPaths::new(&home, "run-a");
        paths.ensure().unwrap();
        paths
    }

    #[test]
    fn test_nearest_rank_percentiles() {
        let samples: Vec<u64> = (1..=20).collect();
        let stats = LatencyStats::from_samples(&samples);
        assert_eq!(stats.p50, 10);
        assert_eq!(stats.p95, 19);
        assert_eq!(stats.max, 20);
        assert!((stats.mean - 10.5).abs() < 1e-9);
        assert_eq!(LatencyStats::from_samples(&[]).max, 0);
    }

    #[test]
    fn test_trace_log_appends_and_dedupes() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        append_trace(&paths, &[entry(2, 5), entry(1, 3)]).unwrap();
        append_trace(&paths, &[entry(2, 5), entry(3, 8)]).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(paths.root().join(TRACE_LOG))
            .unwrap()
            .write_all(b"{\"tool_call_id\": 9, \"operat")
            .unwrap();

        let ids: Vec<u64> = read_trace(&paths).unwrap().iter().map(|e| e.tool_call_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_append_after_torn_line_keeps_new_entries() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        append_trace(&paths, &[entry(1, 3)]).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(paths.root().join(TRACE_LOG))
            .unwrap()
            .write_all(b"{\"tool_call_id\": 2, \"operat")
            .unwrap();

        // The process restarts and the next commit appends
        append_trace(&paths, &[entry(3, 8), entry(4, 2)]).unwrap();

        let ids: Vec<u64> = read_trace(&paths).unwrap().iter().map(|e| e.tool_call_id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
        let content = std::fs::read_to_string(paths.root().join(TRACE_LOG)).unwrap();
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn test_recovery_of_unstructured_run_is_empty() {
        let state = OrchestrationState::new("run-a", Platform::Ado, "Shop".into());
        let report = RecoveryReport::from_state(&state);
        assert!(report.succeeded.is_empty() && report.remaining.is_empty());
        assert_eq!(report.resume, "brdflow resume run-a");
    }

    #[test]
    fn test_failure_report_is_canonical_json() {
        let tmp = TempDir::new().unwrap();
        let paths = paths(&tmp);
        let mut state = OrchestrationState::new("run-a", Platform::Jira, "Shop".into());
        state.status = RunStatus::Escalated;
        let err = BrdflowError::Phase(brdflow_utils::error::PhaseError::Escalated {
            phase: PhaseId::Auth,
            reason: "token expired".into(),
        });
        let report = FailureReport::new(&state, &err, None);
        assert_eq!(report.code, 12);
        write_failure_artifacts(&paths, &state, &report).unwrap();

        let written = std::fs::read_to_string(paths.artifact(REPORT)).unwrap();
        assert!(written.starts_with(r#"{"checkpoint_ref":null,"code":12,"kind":"escalated""#));
        assert!(paths.artifact(RECOVERY).exists());
        assert!(paths.artifact(TRACE).exists());
    }
}
