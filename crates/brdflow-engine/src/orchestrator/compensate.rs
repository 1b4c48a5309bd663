use std::collections::HashSet;

use chrono::Utc;
use serde_json::json;

use brdflow_config::CompensationPolicy;
use brdflow_gateway::Operation;
use brdflow_utils::error::{BrdflowError, PhaseError};
use brdflow_utils::types::PhaseId;

use super::{Orchestrator, Step};
use crate::mapping::partial_fields;
use crate::state::{CompensationRecord, ProjectRef};

impl Orchestrator {
    /// Undo or flag the successful creations of a level whose failure ratio
    /// reached the threshold, then escalate.
    ///
    /// Always returns `Err(PhaseError::Escalated)` once compensation is recorded.
    pub(super) async fn compensate(
        &mut self,
        project: &ProjectRef,
        depth: usize,
        attempted: usize,
        failed: usize,
    ) -> Result<Step, BrdflowError> {
        let policy = self.config.creation.compensation_policy;
        tracing::warn!(
            depth,
            attempted,
            failed,
            policy = %policy,
            project = %project.name,
            "Creation failures reached the compensation threshold"
        );

        let mut batch: Vec<(String, String)> = self
            .state
            .created_items
            .iter()
            .filter(|i| i.depth == depth)
            .map(|i| (i.key.clone(), i.trace_id.clone()))
            .collect();
        let mut seen = HashSet::new();
        batch.retain(|(key, _)| seen.insert(key.clone()));

        let mut record = CompensationRecord {
            policy: policy.to_string(),
            depth,
            attempted,
            failed,
            deleted: Vec::new(),
            marked: Vec::new(),
            skipped: Vec::new(),
            at: Utc::now(),
        };

        for (key, trace_id) in batch {
            match policy {
                CompensationPolicy::Delete => self.delete_created(&key, &trace_id, &mut record).await?,
                CompensationPolicy::MarkPartial => self.mark_partial(&key, &trace_id, &mut record).await,
            }
        }

        tracing::info!(
            deleted = record.deleted.len(),
            marked = record.marked.len(),
            skipped = record.skipped.len(),
            "Compensation applied"
        );
        self.state.compensation = Some(record);
        self.commit("compensated")?;

        let pct = self.config.creation.compensation_threshold_pct;
        Err(PhaseError::Escalated {
            phase: PhaseId::CreateVerify,
            reason: format!(
                "{failed} of {attempted} creations failed at level {depth} (threshold {pct}%); \
                 compensation '{policy}' applied, see recovery.json"
            ),
        }
        .into())
    }

    async fn delete_created(
        &mut self,
        key: &str,
        trace_id: &str,
        record: &mut CompensationRecord,
    ) -> Result<(), BrdflowError> {
        let has_children = self
            .state
            .created_items
            .iter()
            .any(|i| i.parent_key.as_deref() == Some(key));
        if has_children {
            record.skipped.push((key.to_string(), "has created children".to_string()));
            return Ok(());
        }

        match self.gateway.call(Operation::DeleteIssue, json!({ "key": key })).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => tracing::debug!(key, "Already gone"),
            Err(e) => {
                tracing::warn!(key, error = %e, "Could not delete during compensation");
                record.skipped.push((key.to_string(), e.to_string()));
                return Ok(());
            }
        }

        let removed: Vec<_> = self
            .state
            .created_items
            .iter()
            .filter(|i| i.key == key)
            .map(|i| (i.ledger_key.clone(), i.trace_id.clone()))
            .collect();
        for (ledger_key, trace) in &removed {
            self.state.ledger.retract(ledger_key);
            if let Some(tree) = self.state.hierarchy.as_mut() {
                tree.set_created_key(trace, None);
            }
        }
        self.state.created_items.retain(|i| i.key != key);
        record.deleted.push(key.to_string());
        self.commit(&format!("deleted {trace_id}"))
    }

    async fn mark_partial(&mut self, key: &str, trace_id: &str, record: &mut CompensationRecord) {
        let fields = self
            .state
            .hierarchy
            .as_ref()
            .and_then(|t| t.find(trace_id))
            .map(|node| partial_fields(self.state.platform, node));
        let Some(fields) = fields else {
            record.skipped.push((key.to_string(), "node not in hierarchy".to_string()));
            return;
        };
        match self
            .gateway
            .call(Operation::UpdateIssue, json!({ "key": key, "fields": fields }))
            .await
        {
            Ok(_) => record.marked.push(key.to_string()),
            Err(e) => {
                tracing::warn!(key, error = %e, "Could not mark item partial");
                record.skipped.push((key.to_string(), e.to_string()));
            }
        }
    }
}
