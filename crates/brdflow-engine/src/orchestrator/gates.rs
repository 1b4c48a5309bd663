//! Gate replies
//!
//! Both gates suspend the run with [`RunStatus::AwaitingGate`]. A reply is
//! applied through [`Orchestrator::reply`]; [`Orchestrator::wait_for_reply`]
//! is the interactive loop that reads replies from a stream or the run's
//! reply file until the run closes, stops, or the gate times out.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use brdflow_gateway::Operation;
use brdflow_hierarchy::{EditInstruction, apply_edit, ensure_valid};
use brdflow_redaction::redact_user_string;
use brdflow_utils::error::{BrdflowError, GateError, PhaseError, StructureError};
use brdflow_utils::types::{ErrorClass, GateKind, PhaseId};

use super::{Orchestrator, RunOutcome, value_str};
use crate::reply::GateReply;
use crate::state::{GateState, OrganizationRef, RunStatus, UserReply};
use crate::transition::validate_transition;

/// How often a waiting gate checks the reply file, cancellation and expiry.
const REPLY_POLL: Duration = Duration::from_millis(200);

impl Orchestrator {
    /// Apply an operator reply to the open gate and continue the run.
    ///
    /// Unrecognized text is recorded and ignored; the gate stays open and its
    /// timeout keeps running.
    ///
    /// # Errors
    ///
    /// - [`GateError::NotAwaiting`] when no gate is open
    /// - [`GateError::Timeout`] when the gate expired before the reply
    /// - [`GateError::ActionNotAllowed`] for a reply meant for the other gate
    /// - [`GateError::UnknownOrganization`], a [`StructureError`] for a bad edit,
    ///   or a gateway error from the organization calls; the gate stays open
    pub async fn reply(&mut self, text: &str) -> Result<RunOutcome, BrdflowError> {
        let gate = match &self.state.awaiting_gate {
            Some(gate) if self.state.status == RunStatus::AwaitingGate => gate.gate,
            _ => {
                return Err(GateError::NotAwaiting {
                    run_id: self.state.run_id.clone(),
                }
                .into());
            }
        };
        self.check_gate_expiry()?;

        let parsed = GateReply::parse(text);
        self.state.user_replies.push(UserReply {
            gate,
            received_at: Utc::now(),
            text: redact_user_string(text.trim()),
            accepted: false,
        });

        let Some(reply) = parsed else {
            tracing::info!(gate = %gate, "Unrecognized reply ignored");
            self.commit("reply ignored")?;
            return self.awaiting();
        };
        if reply.gate() != gate {
            self.commit("reply rejected")?;
            return Err(GateError::ActionNotAllowed {
                gate,
                action: reply.action().to_string(),
            }
            .into());
        }

        tracing::info!(gate = %gate, action = reply.action(), "Applying gate reply");
        if let Err(e) = self.apply_reply(reply).await {
            tracing::warn!(gate = %gate, error = %e, "Gate reply could not be applied");
            self.commit("reply rejected")?;
            return Err(e);
        }
        if let Some(last) = self.state.user_replies.last_mut() {
            last.accepted = true;
        }
        self.commit("reply applied")?;
        self.run().await
    }

    fn awaiting(&self) -> Result<RunOutcome, BrdflowError> {
        match &self.state.awaiting_gate {
            Some(gate) => Ok(RunOutcome::AwaitingGate {
                gate: gate.gate,
                prompt: gate.prompt.clone(),
            }),
            None => Err(GateError::NotAwaiting {
                run_id: self.state.run_id.clone(),
            }
            .into()),
        }
    }

    async fn apply_reply(&mut self, reply: GateReply) -> Result<(), BrdflowError> {
        match reply {
            GateReply::SelectOrganization(wanted) => {
                let org = self
                    .state
                    .organizations
                    .iter()
                    .find(|o| o.id == wanted || o.name.eq_ignore_ascii_case(&wanted))
                    .cloned()
                    .ok_or(GateError::UnknownOrganization { name: wanted })?;
                self.select_organization(org).await?;
                self.close_gate();
            }
            GateReply::CreateOrganization(name) => {
                let data = self
                    .gateway
                    .call(
                        Operation::CreateOrganization,
                        json!({ "name": name, "region": self.config.discovery.region }),
                    )
                    .await?;
                let org = OrganizationRef {
                    id: value_str(data.get("id")).unwrap_or_else(|| name.clone()),
                    name: value_str(data.get("name")).unwrap_or(name),
                };
                tracing::info!(organization = %org.name, "Organization created");
                self.state.organizations.push(org.clone());
                self.select_organization(org).await?;
                self.close_gate();
            }
            GateReply::Approve => {
                validate_transition(PhaseId::Review, PhaseId::CreateVerify)?;
                self.state.review.approved = true;
                self.state.phase = PhaseId::CreateVerify;
                self.close_gate();
            }
            GateReply::Reject => {
                validate_transition(PhaseId::Review, PhaseId::Parse)?;
                self.state.review.rejections += 1;
                self.state.parse = None;
                self.state.hierarchy = None;
                self.state.phase = PhaseId::Parse;
                self.close_gate();
            }
            GateReply::Edit(instruction) => {
                let edit: EditInstruction = instruction.parse()?;
                let mut tree = self.state.hierarchy.clone().ok_or(StructureError::Empty)?;
                apply_edit(&mut tree, &edit)?;
                ensure_valid(&mut tree)?;
                self.state.hierarchy = Some(tree);
                self.state.review.edits.push(instruction);
                self.state.awaiting_gate = Some(GateState::open(GateKind::B, self.review_prompt()));
            }
        }
        Ok(())
    }

    fn close_gate(&mut self) {
        self.state.awaiting_gate = None;
        self.state.status = RunStatus::Running;
    }

    pub(super) async fn select_organization(&mut self, org: OrganizationRef) -> Result<(), BrdflowError> {
        self.gateway
            .call(Operation::SelectOrganization, json!({ "organization": org.id }))
            .await?;
        tracing::info!(organization = %org.name, "Organization selected");
        self.state.organization = Some(org);
        Ok(())
    }

    /// Run interactively: whenever the run halts at a gate, `show` the prompt
    /// and wait for a reply line from `input` or the run's reply file.
    ///
    /// Replies that cannot be applied are reported and the gate keeps waiting.
    /// Once `input` reaches end of file only the reply file is watched.
    ///
    /// # Errors
    ///
    /// As [`Self::run`], plus [`GateError::Timeout`] when no usable reply
    /// arrives in time and [`PhaseError::Cancelled`] on cancellation.
    pub async fn wait_for_reply<R, P>(&mut self, mut input: R, mut show: P) -> Result<RunOutcome, BrdflowError>
    where
        R: AsyncBufRead + Unpin,
        P: FnMut(GateKind, &str),
    {
        let mut outcome = self.run().await?;
        let mut eof = false;
        loop {
            let RunOutcome::AwaitingGate { gate, prompt } = &outcome else {
                return Ok(outcome);
            };
            show(*gate, prompt);
            let text = self.next_reply(&mut input, &mut eof).await?;
            match self.reply(&text).await {
                Ok(next) => outcome = next,
                Err(e) if is_input_error(&e) => {
                    tracing::warn!(error = %e, "Reply not applied, still waiting");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn next_reply<R>(&mut self, input: &mut R, eof: &mut bool) -> Result<String, BrdflowError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut ticker = tokio::time::interval(REPLY_POLL);
        let mut line = String::new();
        loop {
            tokio::select! {
                read = input.read_line(&mut line), if !*eof => match read {
                    Ok(0) => *eof = true,
                    Ok(_) => {
                        let text = line.trim().to_string();
                        line.clear();
                        if !text.is_empty() {
                            return Ok(text);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Reply input failed, watching the reply file only");
                        *eof = true;
                    }
                },
                _ = ticker.tick() => {
                    if self.cancel.is_cancelled() {
                        let phase = self.state.phase;
                        return Err(self.fail(PhaseError::Cancelled { phase }.into()));
                    }
                    if let Some(text) = self.take_reply_file()? {
                        return Ok(text);
                    }
                    self.check_gate_expiry()?;
                }
            }
        }
    }

    /// Consume a reply dropped into the run directory by `brdflow reply`.
    fn take_reply_file(&self) -> Result<Option<String>, BrdflowError> {
        let path = self.paths.reply_file();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        std::fs::remove_file(&path)?;
        let text = text.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

/// Errors caused by the reply itself rather than the run.
fn is_input_error(error: &BrdflowError) -> bool {
    match error {
        BrdflowError::Gate(GateError::ActionNotAllowed { .. } | GateError::UnknownOrganization { .. })
        | BrdflowError::Structure(_) => true,
        BrdflowError::Gateway(e) => e.class() == ErrorClass::Client,
        _ => false,
    }
}
