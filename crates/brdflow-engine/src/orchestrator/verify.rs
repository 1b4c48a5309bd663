use serde_json::{Value, json};

use brdflow_gateway::Operation;
use brdflow_utils::error::BrdflowError;

use super::{Orchestrator, value_str};
use crate::mapping::FieldMap;
use crate::poll::PollPolicy;
use crate::state::{BatchCheck, ProjectRef};

impl Orchestrator {
    /// Re-read every created item that has no verdict yet.
    ///
    /// Not-found answers are retried with the readiness-poll delay, up to the
    /// configured number of reads; an item that never shows up, or shows up
    /// under the wrong parent, is marked unverifiable and the run continues.
    pub(super) async fn verify(&mut self, project: &ProjectRef) -> Result<(), BrdflowError> {
        if self.state.created_items.len() > self.config.creation.verify_batch_threshold {
            self.batch_check(project).await;
        }

        let policy = PollPolicy::from_config(&self.config.creation);
        let max_reads = self.config.creation.verify_not_found_attempts.max(1);
        let parent_field = FieldMap::for_platform(self.state.platform).parent_id;

        for idx in 0..self.state.created_items.len() {
            let item = &self.state.created_items[idx];
            if item.is_settled() {
                continue;
            }
            let key = item.key.clone();
            let expected_parent = item.parent_key.clone();

            let mut reads = 0;
            let verdict = loop {
                reads += 1;
                match self.gateway.call(Operation::GetIssue, json!({ "key": key })).await {
                    Ok(data) => break check_parent(&data, parent_field, expected_parent.as_deref()),
                    Err(e) if e.is_not_found() && reads < max_reads => {
                        tracing::debug!(key = %key, reads, "Not visible yet, reading again");
                        tokio::time::sleep(policy.delay(reads)).await;
                    }
                    Err(e) if e.is_not_found() => break Err(format!("not found after {reads} reads")),
                    Err(e) => break Err(format!("read failed: {e}")),
                }
            };

            let item = &mut self.state.created_items[idx];
            item.verify_attempts = reads;
            match verdict {
                Ok(()) => item.verified = true,
                Err(reason) => {
                    tracing::warn!(key = %key, reason = %reason, "Item unverifiable");
                    item.unverifiable = Some(reason);
                }
            }
            self.commit(&format!("verified {key}"))?;
        }

        tracing::info!(
            verified = self.state.verified_count(),
            unverifiable = self.state.unverifiable_count(),
            "Verification finished"
        );
        Ok(())
    }

    /// Compare the number of created items with one project-wide search.
    async fn batch_check(&mut self, project: &ProjectRef) {
        let payload = json!({
            "project": project.handle(self.state.platform),
            "created_after": self.state.started_at.to_rfc3339(),
        });
        match self.gateway.call(Operation::SearchIssues, payload).await {
            Ok(data) => {
                let found = data
                    .get("total")
                    .and_then(Value::as_u64)
                    .and_then(|t| usize::try_from(t).ok())
                    .or_else(|| data.get("issues").and_then(Value::as_array).map(Vec::len))
                    .unwrap_or(0);
                let expected = self.state.created_items.len();
                if found < expected {
                    tracing::warn!(expected, found, "Project search finds fewer items than were created");
                }
                self.state.batch_check = Some(BatchCheck { expected, found });
            }
            Err(e) => tracing::warn!(error = %e, "Batch verification search failed"),
        }
    }
}

/// The read item must sit under the parent it was created with, when the
/// response reports a parent at all.
fn check_parent(data: &Value, parent_field: &str, expected: Option<&str>) -> Result<(), String> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = value_str(data.get("parent"))
        .or_else(|| value_str(data.get("fields").and_then(|f| f.get(parent_field))));
    match actual {
        Some(actual) if actual != expected => Err(format!("parent is {actual}, expected {expected}")),
        _ => Ok(()),
    }
}
