//! Phase orchestrator
//!
//! [`Orchestrator`] drives one run through the ten phases. All run state lives
//! in [`OrchestrationState`], which is checkpointed after every phase
//! transition and every creation or verification step. A gate suspends the
//! run: [`Orchestrator::run`] returns [`RunOutcome::AwaitingGate`] and the
//! caller later answers with [`Orchestrator::reply`], possibly from another
//! process after [`Orchestrator::open`].
//!
//! One process drives a run at a time; the orchestrator holds the run's
//! [`FileLock`] for its whole lifetime.

mod compensate;
mod create;
mod gates;
mod phases;
mod verify;

use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde_json::Value;
use tracing::Instrument;

use brdflow_checkpoint::{CheckpointRef, CheckpointStore};
use brdflow_config::Config;
use brdflow_gateway::ToolGateway;
use brdflow_lock::FileLock;
use brdflow_parse::{BrdParser, HeuristicExtractor};
use brdflow_redaction::redact_user_string;
use brdflow_utils::atomic_write::write_file_atomic;
use brdflow_utils::error::{BrdflowError, CheckpointError, GateError, GatewayError, ParseError, PhaseError};
use brdflow_utils::exit_codes::ExitCode;
use brdflow_utils::logging::{log_phase_complete, log_phase_error, log_phase_start, phase_span, run_span};
use brdflow_utils::paths::RunPaths;
use brdflow_utils::types::{ErrorClass, GateKind, PhaseId, Platform};

use crate::artifacts::{self, FailureReport};
use crate::cancel::CancelToken;
use crate::state::{GateState, OrchestrationState, ProjectRef, RunStatus};
use crate::status::RunStatusReport;
use crate::transition::validate_transition;

/// Where a call to `run`, `resume` or `reply` left the run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Suspended at a gate; answer with [`Orchestrator::reply`].
    AwaitingGate { gate: GateKind, prompt: String },
    /// Closed; `status` is completed or partial.
    Completed {
        status: RunStatus,
        created: usize,
        verified: usize,
        failed: usize,
        unverifiable: usize,
        artifacts_dir: Utf8PathBuf,
    },
}

impl RunOutcome {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::AwaitingGate { .. } => ExitCode::AWAITING_GATE,
            Self::Completed {
                status: RunStatus::Completed,
                ..
            } => ExitCode::SUCCESS,
            Self::Completed { .. } => ExitCode::PARTIAL,
        }
    }
}

/// Result of executing one phase.
pub(crate) enum Step {
    Advance,
    Halt(GateKind, String),
    Finish,
}

pub struct Orchestrator {
    config: Config,
    paths: RunPaths,
    store: CheckpointStore,
    gateway: ToolGateway,
    parser: Arc<dyn BrdParser>,
    state: OrchestrationState,
    cancel: CancelToken,
    last_checkpoint: Option<CheckpointRef>,
    _lock: FileLock,
}

impl Orchestrator {
    /// Create a new run and commit its first checkpoint.
    ///
    /// The BRD text is copied into the run directory so resumes parse the same
    /// input. The platform is the gateway's.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::AlreadyExists`] when `run_id` was started before, a
    /// [`brdflow_utils::error::LockError`] when another process holds the run,
    /// or [`ParseError::EmptyDocument`] for a blank BRD.
    pub fn start(
        config: Config,
        home: &Utf8Path,
        run_id: &str,
        brd_text: &str,
        gateway: ToolGateway,
        parser: Arc<dyn BrdParser>,
        force: bool,
    ) -> Result<Self, BrdflowError> {
        if brd_text.trim().is_empty() {
            return Err(ParseError::EmptyDocument.into());
        }
        let paths = RunPaths::new(home, run_id);
        let lock = FileLock::acquire(paths.root(), run_id, force, None)?;
        let store = CheckpointStore::new(&paths, run_id);
        if store.latest::<OrchestrationState>()?.is_some() {
            return Err(CheckpointError::AlreadyExists {
                run_id: run_id.to_string(),
            }
            .into());
        }
        paths.ensure()?;
        write_file_atomic(&paths.brd_copy(), brd_text).map_err(|e| BrdflowError::ArtifactWriteFailed {
            path: paths.brd_copy().to_string(),
            reason: format!("{e:#}"),
        })?;

        let brd_title = HeuristicExtractor::new().extract(brd_text).ok().and_then(|r| r.title);
        let project_name = config
            .discovery
            .project
            .clone()
            .or_else(|| brd_title.clone())
            .unwrap_or_else(|| run_id.to_string());
        let mut state = OrchestrationState::new(run_id, gateway.platform(), project_name);
        state.brd_title = brd_title;

        let mut orchestrator = Self {
            cancel: CancelToken::new(paths.cancel_marker()),
            config,
            paths,
            store,
            gateway,
            parser,
            state,
            last_checkpoint: None,
            _lock: lock,
        };
        orchestrator.commit("start")?;
        tracing::info!(
            run_id,
            platform = %orchestrator.state.platform,
            project = %orchestrator.state.project_name,
            "Run started"
        );
        Ok(orchestrator)
    }

    /// Reopen an existing run from its latest checkpoint.
    ///
    /// `connect` builds the gateway for the run's recorded platform. Tool call
    /// ids continue after the highest id the run has used, including an
    /// interrupted write.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`] for unknown runs, lock errors, or the
    /// error returned by `connect`.
    pub fn open<F>(
        config: Config,
        home: &Utf8Path,
        run_id: &str,
        force: bool,
        connect: F,
        parser: Arc<dyn BrdParser>,
    ) -> Result<Self, BrdflowError>
    where
        F: FnOnce(Platform) -> Result<ToolGateway, GatewayError>,
    {
        let paths = RunPaths::new(home, run_id);
        let lock = FileLock::acquire(paths.root(), run_id, force, None)?;
        let store = CheckpointStore::new(&paths, run_id);
        let record = store.require_latest::<OrchestrationState>()?;
        let last_checkpoint = store.list()?.pop().map(|(seq, path)| CheckpointRef {
            seq,
            phase: record.phase,
            path,
        });
        let state = record.state_snapshot;

        let gateway = connect(state.platform)?;
        let last_id = state
            .in_flight
            .as_ref()
            .map_or(state.last_tool_call_id, |w| w.tool_call_id.max(state.last_tool_call_id));
        gateway.resume_ids_after(last_id);

        tracing::info!(
            run_id,
            seq = record.seq,
            phase = %state.phase,
            status = %state.status,
            "Run reopened from checkpoint"
        );
        Ok(Self {
            cancel: CancelToken::new(paths.cancel_marker()),
            config,
            paths,
            store,
            gateway,
            parser,
            state,
            last_checkpoint,
            _lock: lock,
        })
    }

    #[must_use]
    pub fn state(&self) -> &OrchestrationState {
        &self.state
    }

    #[must_use]
    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    /// Handle for requesting cancellation from another task (Ctrl-C).
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn last_checkpoint(&self) -> Option<&CheckpointRef> {
        self.last_checkpoint.as_ref()
    }

    /// Drive the run until it closes or halts at a gate.
    ///
    /// A run that previously stopped (failed, escalated, cancelled) is reopened
    /// first; a closed run just reports its outcome.
    ///
    /// # Errors
    ///
    /// The error that stopped the run. A failure report and recovery artifact
    /// have been written and the state checkpointed by the time it returns.
    pub async fn run(&mut self) -> Result<RunOutcome, BrdflowError> {
        if self.is_stopped() {
            self.reopen()?;
        }
        let span = run_span(&self.state.run_id, self.state.platform.as_str());
        self.drive().instrument(span).await
    }

    /// Continue a stopped or suspended run from its latest checkpoint.
    ///
    /// Clears any cancellation request first. A gate that stopped the run by
    /// timing out is reopened with a fresh timeout; a gate that is still open
    /// but expired escalates.
    ///
    /// # Errors
    ///
    /// [`PhaseError::Finished`] for closed runs, otherwise as [`Self::run`].
    pub async fn resume(&mut self) -> Result<RunOutcome, BrdflowError> {
        if self.state.status.is_closed() {
            return Err(PhaseError::Finished.into());
        }
        self.cancel.clear()?;
        if self.is_stopped() {
            self.reopen()?;
        } else {
            self.commit("resume")?;
        }
        self.run().await
    }

    fn is_stopped(&self) -> bool {
        matches!(
            self.state.status,
            RunStatus::Failed | RunStatus::Escalated | RunStatus::Cancelled
        )
    }

    fn reopen(&mut self) -> Result<(), BrdflowError> {
        tracing::info!(
            previous = %self.state.status,
            phase = %self.state.phase,
            "Reopening stopped run"
        );
        self.state.last_error = None;
        self.state.status = match self.state.awaiting_gate.as_mut() {
            Some(gate) => {
                gate.opened_at = Utc::now();
                RunStatus::AwaitingGate
            }
            None => RunStatus::Running,
        };
        self.commit("resume")
    }

    async fn drive(&mut self) -> Result<RunOutcome, BrdflowError> {
        loop {
            if self.state.status.is_closed() {
                return Ok(self.completed());
            }
            if let Some(gate) = self.state.awaiting_gate.clone() {
                self.check_gate_expiry()?;
                return Ok(RunOutcome::AwaitingGate {
                    gate: gate.gate,
                    prompt: gate.prompt,
                });
            }
            if self.cancel.is_cancelled() {
                let phase = self.state.phase;
                tracing::warn!(phase = %phase, "Cancellation requested, stopping at phase boundary");
                return Err(self.fail(PhaseError::Cancelled { phase }.into()));
            }

            let phase = self.state.phase;
            let run_id = self.state.run_id.clone();
            let started = Instant::now();
            log_phase_start(&run_id, phase.as_str());
            let step = self
                .run_phase(phase)
                .instrument(phase_span(&run_id, phase.as_str()))
                .await;

            let applied = step.and_then(|step| self.apply(step));
            let elapsed = started.elapsed().as_millis();
            match applied {
                Ok(()) => log_phase_complete(&run_id, phase.as_str(), elapsed),
                Err(e) => {
                    log_phase_error(&run_id, phase.as_str(), &e.to_string(), elapsed);
                    return Err(self.fail(e));
                }
            }
        }
    }

    fn apply(&mut self, step: Step) -> Result<(), BrdflowError> {
        match step {
            Step::Advance => {
                let from = self.state.phase;
                let to = from.next().ok_or(PhaseError::Finished)?;
                validate_transition(from, to)?;
                self.state.phase = to;
                self.commit(&format!("enter {}", to.as_str()))
            }
            Step::Halt(gate, prompt) => {
                tracing::info!(gate = %gate, "Halting for operator reply");
                self.state.awaiting_gate = Some(GateState::open(gate, prompt));
                self.state.status = RunStatus::AwaitingGate;
                self.commit(gate_cursor(gate))
            }
            Step::Finish => Ok(()),
        }
    }

    /// Escalate when the open gate has waited past the gate timeout.
    fn check_gate_expiry(&mut self) -> Result<(), BrdflowError> {
        let timeout_s = self.config.gates.gate_timeout_s;
        let expired = self
            .state
            .awaiting_gate
            .as_ref()
            .filter(|g| g.is_expired(Utc::now(), timeout_s))
            .map(|g| (g.gate, g.waited_secs(Utc::now())));
        match expired {
            Some((gate, waited_secs)) => {
                tracing::warn!(gate = %gate, waited_secs, "Gate timed out without a reply");
                Err(self.fail(GateError::Timeout { gate, waited_secs }.into()))
            }
            None => Ok(()),
        }
    }

    /// Persist the current state as the next checkpoint.
    ///
    /// Drains the gateway trace into the run's trace log first, so every
    /// checkpoint covers the calls that led to it.
    pub(crate) fn commit(&mut self, cursor: &str) -> Result<(), BrdflowError> {
        let trace = self.gateway.drain_trace();
        for entry in trace.iter().filter(|e| e.attempts > 1) {
            self.state.retry_counts.insert(entry.tool_call_id, entry.attempts - 1);
        }
        artifacts::append_trace(&self.paths, &trace).map_err(|e| BrdflowError::ArtifactWriteFailed {
            path: self.paths.root().join("trace.jsonl").to_string(),
            reason: format!("{e:#}"),
        })?;

        self.state.last_tool_call_id = self
            .state
            .last_tool_call_id
            .max(self.gateway.peek_next_id().saturating_sub(1));
        self.state.updated_at = Utc::now();
        let checkpoint = self.store.append(self.state.phase, cursor, &self.state)?;
        self.last_checkpoint = Some(checkpoint);
        Ok(())
    }

    /// Record an unrecoverable error: classify, checkpoint, write the failure
    /// report and recovery artifact. Returns the classified error.
    fn fail(&mut self, error: BrdflowError) -> BrdflowError {
        let phase = self.state.phase;
        let error = match error {
            BrdflowError::Gateway(e) if e.class() == ErrorClass::Client => PhaseError::Escalated {
                phase,
                reason: e.to_string(),
            }
            .into(),
            BrdflowError::Gateway(e) => PhaseError::Failed {
                phase,
                code: e.code(),
                message: e.to_string(),
            }
            .into(),
            other => other,
        };

        self.state.status = match &error {
            BrdflowError::Phase(PhaseError::Cancelled { .. }) => RunStatus::Cancelled,
            BrdflowError::Phase(PhaseError::Escalated { .. })
            | BrdflowError::Gate(GateError::Timeout { .. }) => RunStatus::Escalated,
            _ => RunStatus::Failed,
        };
        self.state.last_error = Some(redact_user_string(&error.to_string()));
        if let Err(e) = self.commit("failed") {
            tracing::warn!(error = %e, "Could not checkpoint failed run");
        }

        let report = FailureReport::new(&self.state, &error, self.last_checkpoint.as_ref());
        if let Err(e) = artifacts::write_failure_artifacts(&self.paths, &self.state, &report) {
            tracing::warn!(error = %e, "Could not write failure artifacts");
        }
        tracing::error!(
            status = %self.state.status,
            phase = %phase,
            code = report.code,
            "Run stopped"
        );
        error
    }

    fn completed(&self) -> RunOutcome {
        RunOutcome::Completed {
            status: self.state.status,
            created: self.state.created_items.len(),
            verified: self.state.verified_count(),
            failed: self.state.failed_nodes.len(),
            unverifiable: self.state.unverifiable_count(),
            artifacts_dir: self.paths.artifacts_dir(),
        }
    }

    fn require_project(&self, phase: PhaseId) -> Result<ProjectRef, BrdflowError> {
        self.state.project.clone().ok_or_else(|| missing(phase, "project"))
    }

    /// Status of any run, read from disk without taking its lock.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`] for unknown runs.
    pub fn status(config: &Config, home: &Utf8Path, run_id: &str) -> Result<RunStatusReport, BrdflowError> {
        RunStatusReport::load(&RunPaths::new(home, run_id), run_id, config.gates.gate_timeout_s)
    }

    /// Ask whichever process drives `run_id` to stop at its next phase
    /// boundary or gate check.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`] for unknown runs, or an IO error writing
    /// the marker.
    pub fn request_cancel(home: &Utf8Path, run_id: &str) -> Result<(), BrdflowError> {
        let paths = RunPaths::new(home, run_id);
        CheckpointStore::new(&paths, run_id).require_latest::<OrchestrationState>()?;
        std::fs::write(paths.cancel_marker(), Utc::now().to_rfc3339())?;
        tracing::info!(run_id, "Cancellation requested");
        Ok(())
    }

    /// Hand a reply to the process currently waiting at a gate.
    ///
    /// # Errors
    ///
    /// [`CheckpointError::NotFound`] for unknown runs, or an IO error writing
    /// the reply file.
    pub fn deliver_reply(home: &Utf8Path, run_id: &str, text: &str) -> Result<(), BrdflowError> {
        let paths = RunPaths::new(home, run_id);
        CheckpointStore::new(&paths, run_id).require_latest::<OrchestrationState>()?;
        write_file_atomic(&paths.reply_file(), text).map_err(|e| BrdflowError::ArtifactWriteFailed {
            path: paths.reply_file().to_string(),
            reason: format!("{e:#}"),
        })?;
        Ok(())
    }
}

fn gate_cursor(gate: GateKind) -> &'static str {
    match gate {
        GateKind::A => "gate_a",
        GateKind::B => "gate_b",
    }
}

/// State a phase relies on was never recorded by an earlier phase.
fn missing(phase: PhaseId, what: &str) -> BrdflowError {
    PhaseError::Failed {
        phase,
        code: 0,
        message: format!("{what} missing from run state"),
    }
    .into()
}

/// String form of an id that may arrive as a JSON string or number.
fn value_str(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
