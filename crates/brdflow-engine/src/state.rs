//! Orchestration state
//!
//! [`OrchestrationState`] is the single value threaded through every phase and
//! persisted after every phase transition and every creation or verification
//! step. Resume reads it back from the latest checkpoint; nothing else carries
//! run state between processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use brdflow_hierarchy::HierarchyTree;
use brdflow_ledger::{IdempotencyLedger, LedgerKey};
use brdflow_parse::ParseOutcome;
use brdflow_utils::types::{GateKind, PhaseId, Platform};

use crate::mapping::TypeMapping;

/// Lifecycle of a run as reported by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingGate,
    /// Closed with every item created and verified.
    Completed,
    /// Closed with failed or unverifiable items.
    Partial,
    Failed,
    Escalated,
    Cancelled,
}

impl RunStatus {
    /// Closed runs cannot be resumed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Partial)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingGate => "awaiting_gate",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open approval gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateState {
    pub gate: GateKind,
    pub opened_at: DateTime<Utc>,
    /// Text shown to the operator.
    pub prompt: String,
}

impl GateState {
    #[must_use]
    pub fn open(gate: GateKind, prompt: String) -> Self {
        Self {
            gate,
            opened_at: Utc::now(),
            prompt,
        }
    }

    /// Seconds the gate has been open at `now`.
    #[must_use]
    pub fn waited_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.opened_at).num_seconds()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, timeout_s: u64) -> bool {
        self.waited_secs(now) >= timeout_s
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(default)]
    pub id: Option<String>,
    pub key: String,
    pub name: String,
    /// Created by this run in project setup rather than discovered.
    #[serde(default)]
    pub created_by_run: bool,
    #[serde(default)]
    pub ready: bool,
}

impl ProjectRef {
    /// The identifier the tool server expects in `project` arguments.
    #[must_use]
    pub fn handle(&self, platform: Platform) -> &str {
        match platform {
            Platform::Ado => &self.name,
            Platform::Jira => &self.key,
        }
    }
}

/// One remote item created (or adopted) for a hierarchy node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedItem {
    pub platform: Platform,
    pub key: String,
    pub tool_call_id: u64,
    pub node_id: Uuid,
    pub trace_id: String,
    pub title: String,
    pub issue_type: String,
    #[serde(default)]
    pub parent_key: Option<String>,
    pub ledger_key: LedgerKey,
    /// Depth of the node, i.e. the creation batch it belongs to.
    pub depth: usize,
    pub verified: bool,
    #[serde(default)]
    pub verify_attempts: u32,
    /// Set when verification gave up on the item.
    #[serde(default)]
    pub unverifiable: Option<String>,
    /// Found on the tracker by reconciliation instead of created by a tracked write.
    #[serde(default)]
    pub adopted: bool,
}

impl CreatedItem {
    /// Verification reached a verdict for this item.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.verified || self.unverifiable.is_some()
    }
}

/// A `create_issue` whose outcome is unknown until it returns.
///
/// Checkpointed before the call; a resumed run finding one reconciles it with
/// an exact-title search before writing again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub trace_id: String,
    pub title: String,
    pub ledger_key: LedgerKey,
    #[serde(default)]
    pub parent_key: Option<String>,
    pub issue_type: String,
    /// Id the write is issued under.
    pub tool_call_id: u64,
    pub issued_at: DateTime<Utc>,
}

/// A node whose creation failed or could not be attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedNode {
    pub trace_id: String,
    pub title: String,
    pub depth: usize,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewState {
    pub approved: bool,
    /// Applied edit instructions, in order.
    pub edits: Vec<String>,
    pub rejections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReply {
    pub gate: GateKind,
    pub received_at: DateTime<Utc>,
    pub text: String,
    pub accepted: bool,
}

/// What compensation did to a failed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub policy: String,
    pub depth: usize,
    pub attempted: usize,
    pub failed: usize,
    /// Items deleted (delete policy).
    #[serde(default)]
    pub deleted: Vec<String>,
    /// Items labelled partial (mark_partial policy).
    #[serde(default)]
    pub marked: Vec<String>,
    /// Items compensation could not touch, with the reason.
    #[serde(default)]
    pub skipped: Vec<(String, String)>,
    pub at: DateTime<Utc>,
}

/// Aggregate cross-check of created items against a project search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCheck {
    pub expected: usize,
    pub found: usize,
}

/// Complete, serializable state of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub run_id: String,
    pub platform: Platform,
    pub phase: PhaseId,
    pub status: RunStatus,
    #[serde(default)]
    pub awaiting_gate: Option<GateState>,
    /// Options reported by discovery (ADO).
    #[serde(default)]
    pub organizations: Vec<OrganizationRef>,
    #[serde(default)]
    pub organization: Option<OrganizationRef>,
    /// Name discovery looks for and project setup creates when absent.
    pub project_name: String,
    #[serde(default)]
    pub project: Option<ProjectRef>,
    #[serde(default)]
    pub brd_title: Option<String>,
    #[serde(default)]
    pub parse: Option<ParseOutcome>,
    #[serde(default)]
    pub hierarchy: Option<HierarchyTree>,
    #[serde(default)]
    pub type_mapping: Option<TypeMapping>,
    #[serde(default)]
    pub ledger: IdempotencyLedger,
    #[serde(default)]
    pub created_items: Vec<CreatedItem>,
    #[serde(default)]
    pub in_flight: Option<PendingWrite>,
    #[serde(default)]
    pub failed_nodes: Vec<FailedNode>,
    #[serde(default)]
    pub compensation: Option<CompensationRecord>,
    #[serde(default)]
    pub batch_check: Option<BatchCheck>,
    #[serde(default)]
    pub review: ReviewState,
    /// Retries spent per tool call id.
    #[serde(default)]
    pub retry_counts: BTreeMap<u64, u32>,
    #[serde(default)]
    pub user_replies: Vec<UserReply>,
    #[serde(default)]
    pub last_tool_call_id: u64,
    /// Message of the failure that stopped the run, cleared on resume.
    #[serde(default)]
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestrationState {
    #[must_use]
    pub fn new(run_id: &str, platform: Platform, project_name: String) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            platform,
            phase: PhaseId::Auth,
            status: RunStatus::Running,
            awaiting_gate: None,
            organizations: Vec::new(),
            organization: None,
            project_name,
            project: None,
            brd_title: None,
            parse: None,
            hierarchy: None,
            type_mapping: None,
            ledger: IdempotencyLedger::default(),
            created_items: Vec::new(),
            in_flight: None,
            failed_nodes: Vec::new(),
            compensation: None,
            batch_check: None,
            review: ReviewState::default(),
            retry_counts: BTreeMap::new(),
            user_replies: Vec::new(),
            last_tool_call_id: 0,
            last_error: None,
            started_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn created_item(&self, trace_id: &str) -> Option<&CreatedItem> {
        self.created_items.iter().find(|i| i.trace_id == trace_id)
    }

    #[must_use]
    pub fn verified_count(&self) -> usize {
        self.created_items.iter().filter(|i| i.verified).count()
    }

    #[must_use]
    pub fn unverifiable_count(&self) -> usize {
        self.created_items
            .iter()
            .filter(|i| i.unverifiable.is_some())
            .count()
    }

    /// Closed with everything created and verified?
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_nodes.is_empty()
            && self.compensation.is_none()
            && self.created_items.iter().all(|i| i.verified)
            && self
                .hierarchy
                .as_ref()
                .is_some_and(|t| t.total_items() == self.created_items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_gate_expiry_is_measured_from_opened_at() {
        let mut gate = GateState::open(GateKind::B, "review".into());
        gate.opened_at = Utc::now() - Duration::seconds(301);
        assert!(gate.is_expired(Utc::now(), 300));
        assert!(!gate.is_expired(gate.opened_at + Duration::seconds(10), 300));
    }

    #[test]
    fn test_state_roundtrips_through_json() {
        let mut state = OrchestrationState::new("run-1", Platform::Jira, "Payroll".into());
        state.retry_counts.insert(7, 2);
        state.awaiting_gate = Some(GateState::open(GateKind::A, "pick".into()));
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains(r#""platform":"jira""#));
        assert!(json.contains(r#""phase":1"#));
        let back: OrchestrationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_project_handle_differs_per_platform() {
        let project = ProjectRef {
            id: Some("p1".into()),
            key: "PAY".into(),
            name: "Payroll".into(),
            created_by_run: false,
            ready: true,
        };
        assert_eq!(project.handle(Platform::Ado), "Payroll");
        assert_eq!(project.handle(Platform::Jira), "PAY");
    }

    #[test]
    fn test_closed_statuses() {
        assert!(RunStatus::Completed.is_closed());
        assert!(RunStatus::Partial.is_closed());
        assert!(!RunStatus::Escalated.is_closed());
        assert_eq!(RunStatus::AwaitingGate.to_string(), "awaiting_gate");
    }
}
