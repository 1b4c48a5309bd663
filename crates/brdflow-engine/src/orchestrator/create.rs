//! Parent-first creation
//!
//! Nodes are created level by level in breadth-first order. Every write is
//! preceded by an idempotency ledger lookup and a checkpoint naming the
//! pending write; every outcome is checkpointed before the next node. A
//! resumed run therefore replays only writes whose outcome was never recorded,
//! and reconciles an interrupted write with an exact-title search first.

use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use brdflow_gateway::{Operation, codes};
use brdflow_ledger::LedgerKey;
use brdflow_redaction::redact_user_string;
use brdflow_utils::error::{BrdflowError, StructureError};
use brdflow_utils::types::{ErrorClass, PhaseId};

use super::{Orchestrator, Step, missing, value_str};
use crate::mapping::{TypeMapping, issue_fields};
use crate::poll::{PollPolicy, Probe};
use crate::state::{CreatedItem, FailedNode, PendingWrite, ProjectRef};

/// A node scheduled for creation, detached from the tree borrow.
#[derive(Debug, Clone)]
struct PlannedNode {
    trace_id: String,
    node_id: Uuid,
    depth: usize,
    parent_trace: Option<String>,
    has_children: bool,
}

enum NodeOutcome {
    Created,
    AlreadyCreated,
    Failed,
    /// Parent missing, so no write was possible.
    Blocked,
}

impl Orchestrator {
    pub(super) async fn create_and_verify(&mut self) -> Result<Step, BrdflowError> {
        let phase = PhaseId::CreateVerify;
        let project = self.require_project(phase)?;
        let mapping = self
            .state
            .type_mapping
            .clone()
            .ok_or_else(|| missing(phase, "type mapping"))?;

        let tree = self.state.hierarchy.as_mut().ok_or_else(|| missing(phase, "hierarchy"))?;
        if !tree.frozen {
            tree.freeze();
            self.commit("frozen")?;
        }
        self.reconcile_in_flight(&project).await?;

        // Failed nodes are retried on every entry
        self.state.failed_nodes.clear();
        self.state.compensation = None;

        let threshold_pct = usize::from(self.config.creation.compensation_threshold_pct);
        for (idx, level) in self.plan_levels(phase)?.into_iter().enumerate() {
            let depth = idx + 1;
            let mut attempted = 0usize;
            let mut failed = 0usize;
            for node in &level {
                match self.create_node(&project, &mapping, node).await? {
                    NodeOutcome::Created | NodeOutcome::AlreadyCreated => attempted += 1,
                    NodeOutcome::Failed => {
                        attempted += 1;
                        failed += 1;
                    }
                    NodeOutcome::Blocked => {}
                }
            }
            tracing::info!(depth, attempted, failed, "Creation level finished");
            if failed > 0 && failed * 100 >= threshold_pct * attempted {
                return self.compensate(&project, depth, attempted, failed).await;
            }
        }

        self.verify(&project).await?;
        Ok(Step::Advance)
    }

    fn plan_levels(&self, phase: PhaseId) -> Result<Vec<Vec<PlannedNode>>, BrdflowError> {
        let tree = self.state.hierarchy.as_ref().ok_or_else(|| missing(phase, "hierarchy"))?;
        Ok(tree
            .levels()
            .into_iter()
            .map(|level| {
                level
                    .into_iter()
                    .map(|r| PlannedNode {
                        trace_id: r.node.trace_id.clone(),
                        node_id: r.node.id,
                        depth: r.depth,
                        parent_trace: r.parent.map(|p| p.trace_id.clone()),
                        has_children: !r.node.children.is_empty(),
                    })
                    .collect()
            })
            .collect())
    }

    async fn create_node(
        &mut self,
        project: &ProjectRef,
        mapping: &TypeMapping,
        plan: &PlannedNode,
    ) -> Result<NodeOutcome, BrdflowError> {
        let platform = self.state.platform;

        let (parent_key, parent_ledger) = match &plan.parent_trace {
            None => (None, None),
            Some(parent) => match self.state.created_item(parent) {
                Some(item) => (Some(item.key.clone()), Some(item.ledger_key.clone())),
                None => {
                    let title = self.node_title(&plan.trace_id);
                    tracing::warn!(trace_id = %plan.trace_id, parent = %parent, "Parent not created, skipping node");
                    self.state.failed_nodes.push(FailedNode {
                        trace_id: plan.trace_id.clone(),
                        title,
                        depth: plan.depth,
                        code: 0,
                        message: format!("parent {parent} was not created"),
                    });
                    return Ok(NodeOutcome::Blocked);
                }
            },
        };

        let (title, description, fields) = {
            let tree = self
                .state
                .hierarchy
                .as_ref()
                .ok_or_else(|| missing(PhaseId::CreateVerify, "hierarchy"))?;
            let node = tree.find(&plan.trace_id).ok_or_else(|| StructureError::UnknownNode {
                trace_id: plan.trace_id.clone(),
            })?;
            (
                node.title.clone(),
                node.description.clone(),
                issue_fields(platform, node, plan.depth, parent_key.as_deref()),
            )
        };
        let scope = format!(
            "{}/{}/{}",
            project.key,
            plan.depth,
            parent_ledger.as_ref().map_or("-", LedgerKey::as_str)
        );
        let ledger_key = LedgerKey::derive(&scope, &title, &description);
        let issue_type = mapping.for_depth(plan.depth).to_string();

        if let Some(existing) = self.state.ledger.lookup(&ledger_key).map(str::to_string) {
            if self.state.created_item(&plan.trace_id).is_none() {
                // Same content as a node created earlier; share its item
                let tool_call_id = self
                    .state
                    .created_items
                    .iter()
                    .find(|i| i.key == existing)
                    .map_or(0, |i| i.tool_call_id);
                self.push_created(CreatedItem {
                    platform,
                    key: existing,
                    tool_call_id,
                    node_id: plan.node_id,
                    trace_id: plan.trace_id.clone(),
                    title,
                    issue_type,
                    parent_key,
                    ledger_key,
                    depth: plan.depth,
                    verified: false,
                    verify_attempts: 0,
                    unverifiable: None,
                    adopted: true,
                })?;
            }
            tracing::debug!(trace_id = %plan.trace_id, "Already created, no write issued");
            return Ok(NodeOutcome::AlreadyCreated);
        }

        self.state.in_flight = Some(PendingWrite {
            trace_id: plan.trace_id.clone(),
            title: title.clone(),
            ledger_key: ledger_key.clone(),
            parent_key: parent_key.clone(),
            issue_type: issue_type.clone(),
            tool_call_id: self.gateway.peek_next_id(),
            issued_at: Utc::now(),
        });
        self.commit(&format!("write {}", plan.trace_id))?;

        let payload = json!({
            "project": project.handle(platform),
            "issue_type": issue_type,
            "fields": fields,
        });
        let result = self.gateway.invoke(Operation::CreateIssue, payload).await;

        let key = if result.is_ok() {
            value_str(result.data.get("key")).or_else(|| value_str(result.data.get("id")))
        } else if result.class() == Some(ErrorClass::Transient) {
            // A timed-out write may still have landed
            self.find_existing(project, &title, parent_key.as_deref()).await
        } else {
            None
        };

        let Some(key) = key else {
            let (code, message) = if result.is_ok() {
                (codes::PROTOCOL, "create_issue returned no key".to_string())
            } else {
                (
                    result.code,
                    redact_user_string(result.error.as_deref().unwrap_or("create_issue failed")),
                )
            };
            tracing::warn!(trace_id = %plan.trace_id, code, error = %message, "Creation failed");
            self.state.in_flight = None;
            self.state.failed_nodes.push(FailedNode {
                trace_id: plan.trace_id.clone(),
                title,
                depth: plan.depth,
                code,
                message,
            });
            self.commit(&format!("failed {}", plan.trace_id))?;
            return Ok(NodeOutcome::Failed);
        };

        tracing::info!(trace_id = %plan.trace_id, key = %key, issue_type = %issue_type, "Created");
        self.state.in_flight = None;
        self.push_created(CreatedItem {
            platform,
            key: key.clone(),
            tool_call_id: result.tool_call_id,
            node_id: plan.node_id,
            trace_id: plan.trace_id.clone(),
            title,
            issue_type,
            parent_key,
            ledger_key,
            depth: plan.depth,
            verified: false,
            verify_attempts: 0,
            unverifiable: None,
            adopted: !result.is_ok(),
        })?;

        if plan.has_children {
            self.await_readable(&key).await;
        }
        Ok(NodeOutcome::Created)
    }

    /// Record a created item in the ledger, the state and the tree, then checkpoint.
    fn push_created(&mut self, item: CreatedItem) -> Result<(), BrdflowError> {
        self.state.ledger.record(&item.ledger_key, &item.key)?;
        if let Some(tree) = self.state.hierarchy.as_mut() {
            tree.set_created_key(&item.trace_id, Some(item.key.clone()));
        }
        self.state.failed_nodes.retain(|f| f.trace_id != item.trace_id);
        let cursor = format!("created {}", item.trace_id);
        self.state.created_items.push(item);
        self.commit(&cursor)
    }

    /// Poll until a new parent is readable so its children can reference it.
    async fn await_readable(&self, key: &str) {
        let gateway = &self.gateway;
        let ready = PollPolicy::from_config(&self.config.creation)
            .run(|_| {
                let payload = json!({ "key": key });
                async move {
                    match gateway.call(Operation::GetIssue, payload).await {
                        Ok(_) => Ok(Probe::Ready(())),
                        Err(e) if e.is_not_found() => Ok(Probe::Pending),
                        Err(e) => Err(e),
                    }
                }
            })
            .await;
        match ready {
            Ok(Some(())) => tracing::debug!(key, "Parent readable"),
            Ok(None) => tracing::warn!(key, "Parent not readable within the polling bound, continuing"),
            Err(e) => tracing::warn!(key, error = %e, "Readiness poll failed, continuing"),
        }
    }

    /// Settle a write checkpointed as pending by a run that was interrupted.
    async fn reconcile_in_flight(&mut self, project: &ProjectRef) -> Result<(), BrdflowError> {
        let Some(pending) = self.state.in_flight.clone() else {
            return Ok(());
        };
        tracing::info!(
            trace_id = %pending.trace_id,
            tool_call_id = pending.tool_call_id,
            "Reconciling write interrupted before its outcome was recorded"
        );

        let landed = match self.state.created_item(&pending.trace_id) {
            Some(_) => None,
            None => self
                .find_existing(project, &pending.title, pending.parent_key.as_deref())
                .await,
        };
        self.state.in_flight = None;

        match landed {
            Some(key) => {
                let (node_id, depth) = self
                    .state
                    .hierarchy
                    .as_ref()
                    .and_then(|t| {
                        t.bfs()
                            .into_iter()
                            .find(|r| r.node.trace_id == pending.trace_id)
                            .map(|r| (r.node.id, r.depth))
                    })
                    .ok_or_else(|| StructureError::UnknownNode {
                        trace_id: pending.trace_id.clone(),
                    })?;
                tracing::info!(trace_id = %pending.trace_id, key = %key, "Interrupted write had landed, adopting it");
                self.push_created(CreatedItem {
                    platform: self.state.platform,
                    key,
                    tool_call_id: pending.tool_call_id,
                    node_id,
                    trace_id: pending.trace_id,
                    title: pending.title,
                    issue_type: pending.issue_type,
                    parent_key: pending.parent_key,
                    ledger_key: pending.ledger_key,
                    depth,
                    verified: false,
                    verify_attempts: 0,
                    unverifiable: None,
                    adopted: true,
                })
            }
            None => {
                tracing::info!(trace_id = %pending.trace_id, "Interrupted write did not land, it will be issued again");
                self.commit("reconciled")
            }
        }
    }

    /// An item with exactly this title and parent that no node has claimed yet.
    ///
    /// Search failures count as not found.
    async fn find_existing(&self, project: &ProjectRef, title: &str, parent_key: Option<&str>) -> Option<String> {
        let payload = json!({ "project": project.handle(self.state.platform), "title": title });
        let data = match self.gateway.call(Operation::SearchIssues, payload).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Reconciliation search failed");
                return None;
            }
        };
        data.get("issues")
            .and_then(Value::as_array)?
            .iter()
            .filter(|hit| hit.get("title").and_then(Value::as_str) == Some(title))
            .filter(|hit| value_str(hit.get("parent")).as_deref() == parent_key)
            .filter_map(|hit| value_str(hit.get("key")).or_else(|| value_str(hit.get("id"))))
            .find(|key| !self.state.created_items.iter().any(|i| &i.key == key))
    }

    fn node_title(&self, trace_id: &str) -> String {
        self.state
            .hierarchy
            .as_ref()
            .and_then(|t| t.find(trace_id))
            .map(|n| n.title.clone())
            .unwrap_or_default()
    }
}
