//! Exit code constants and error kind mapping for brdflow.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Run closed with every item verified |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `AWAITING_GATE` | Run paused at a gate, waiting for a reply |
//! | 4 | `PARTIAL` | Run closed with partial or unverifiable items |
//! | 5 | `STRUCTURE_FAILED` | Hierarchy invalid after regrouping |
//! | 9 | `LOCK_HELD` | Another process drives the same run |
//! | 10 | `GATE_TIMEOUT` | A gate expired without a reply |
//! | 11 | `CANCELLED` | Run cancelled by the operator |
//! | 12 | `ESCALATED` | Run escalated to a human |
//! | 70 | `GATEWAY_FAILURE` | Tool server calls failed after retries |

use crate::error::{BrdflowError, PhaseError};
use crate::types::ErrorKind;

/// Exit codes matching the documented exit code table.
///
/// The numeric values are part of the public CLI contract.
///
/// ```rust
/// use brdflow_utils::exit_codes::ExitCode;
///
/// assert_eq!(ExitCode::AWAITING_GATE.as_i32(), 3);
/// assert_eq!(ExitCode::SUCCESS, ExitCode::from_i32(0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - run reached a terminal success state
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments error - invalid arguments, configuration or transition
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Awaiting gate - the run is paused until a reply arrives
    pub const AWAITING_GATE: ExitCode = ExitCode(3);

    /// Partial - closed, but some items are partial or unverifiable
    pub const PARTIAL: ExitCode = ExitCode(4);

    /// Structure failed - hierarchy invalid after one regroup
    pub const STRUCTURE_FAILED: ExitCode = ExitCode(5);

    /// Lock held - another process is driving the same run
    pub const LOCK_HELD: ExitCode = ExitCode(9);

    /// Gate timeout
    pub const GATE_TIMEOUT: ExitCode = ExitCode(10);

    /// Cancelled
    pub const CANCELLED: ExitCode = ExitCode(11);

    /// Escalated - human intervention required
    pub const ESCALATED: ExitCode = ExitCode(12);

    /// Gateway failure - tool server calls failed after the retry policy
    pub const GATEWAY_FAILURE: ExitCode = ExitCode(70);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

/// Convert `BrdflowError` to an (`exit_code`, `error_kind`) tuple
#[must_use]
pub fn error_to_exit_code_and_kind(error: &BrdflowError) -> (ExitCode, ErrorKind) {
    match error {
        BrdflowError::Config(_) => (ExitCode::CLI_ARGS, ErrorKind::CliArgs),

        BrdflowError::Gateway(_) => (ExitCode::GATEWAY_FAILURE, ErrorKind::GatewayFailure),

        BrdflowError::Parse(_) => (ExitCode::INTERNAL, ErrorKind::ParseFailure),

        BrdflowError::Structure(crate::error::StructureError::Invalid { .. }) => {
            (ExitCode::STRUCTURE_FAILED, ErrorKind::StructureFailure)
        }
        // Bad edits are operator input
        BrdflowError::Structure(_) => (ExitCode::CLI_ARGS, ErrorKind::CliArgs),

        BrdflowError::Ledger(_) => (ExitCode::INTERNAL, ErrorKind::LedgerConflict),

        BrdflowError::Checkpoint(
            crate::error::CheckpointError::NotFound { .. }
            | crate::error::CheckpointError::AlreadyExists { .. },
        ) => {
            (ExitCode::CLI_ARGS, ErrorKind::CliArgs)
        }
        BrdflowError::Checkpoint(_) => (ExitCode::INTERNAL, ErrorKind::CheckpointFailure),

        BrdflowError::Lock(_) => (ExitCode::LOCK_HELD, ErrorKind::LockHeld),

        BrdflowError::Phase(phase_err) => match phase_err {
            PhaseError::InvalidTransition { .. } | PhaseError::Finished => {
                (ExitCode::CLI_ARGS, ErrorKind::CliArgs)
            }
            PhaseError::Escalated { .. } => (ExitCode::ESCALATED, ErrorKind::Escalated),
            PhaseError::Cancelled { .. } => (ExitCode::CANCELLED, ErrorKind::Cancelled),
            PhaseError::Failed { code, .. } if *code >= 100 && *code < 400 => {
                (ExitCode::GATEWAY_FAILURE, ErrorKind::GatewayFailure)
            }
            PhaseError::Failed { .. } => (ExitCode::ESCALATED, ErrorKind::Escalated),
        },

        BrdflowError::Gate(gate_err) => match gate_err {
            crate::error::GateError::Timeout { .. } => {
                (ExitCode::GATE_TIMEOUT, ErrorKind::GateTimeout)
            }
            _ => (ExitCode::CLI_ARGS, ErrorKind::CliArgs),
        },

        _ => (ExitCode::INTERNAL, ErrorKind::Unknown),
    }
}

impl From<&BrdflowError> for (ExitCode, ErrorKind) {
    fn from(err: &BrdflowError) -> (ExitCode, ErrorKind) {
        error_to_exit_code_and_kind(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, GateError, GatewayError, StructureError};
    use crate::types::{GateKind, PhaseId};
    use brdflow_lock::LockError;

    #[test]
    fn test_exit_code_constants() {
        assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
        assert_eq!(ExitCode::CLI_ARGS.as_i32(), 2);
        assert_eq!(ExitCode::AWAITING_GATE.as_i32(), 3);
        assert_eq!(ExitCode::PARTIAL.as_i32(), 4);
        assert_eq!(ExitCode::LOCK_HELD.as_i32(), 9);
        assert_eq!(ExitCode::GATEWAY_FAILURE.as_i32(), 70);
    }

    #[test]
    fn test_config_error_mapping() {
        let err = BrdflowError::Config(ConfigError::InvalidFile("bad".to_string()));
        let (code, kind) = (&err).into();
        assert_eq!(code, ExitCode::CLI_ARGS);
        assert_eq!(kind, ErrorKind::CliArgs);
    }

    #[test]
    fn test_gateway_error_mapping() {
        let err = BrdflowError::Gateway(GatewayError::Transport("closed".into()));
        assert_eq!(
            error_to_exit_code_and_kind(&err),
            (ExitCode::GATEWAY_FAILURE, ErrorKind::GatewayFailure)
        );
    }

    #[test]
    fn test_lock_error_mapping() {
        let err = BrdflowError::Lock(LockError::ConcurrentExecution {
            run_id: "run-1".to_string(),
            pid: 4242,
            created_ago: "5m".to_string(),
        });
        let (code, kind) = (&err).into();
        assert_eq!(code, ExitCode::LOCK_HELD);
        assert_eq!(kind, ErrorKind::LockHeld);
    }

    #[test]
    fn test_structure_mapping_distinguishes_edits() {
        let invalid = BrdflowError::Structure(StructureError::Invalid { violations: vec![] });
        assert_eq!(invalid.to_exit_code(), ExitCode::STRUCTURE_FAILED);

        let edit = BrdflowError::Structure(StructureError::UnknownNode {
            trace_id: "r-0099".into(),
        });
        assert_eq!(edit.to_exit_code(), ExitCode::CLI_ARGS);
    }

    #[test]
    fn test_phase_mappings() {
        let escalated = BrdflowError::Phase(PhaseError::Escalated {
            phase: PhaseId::Discovery,
            reason: "no organizations".into(),
        });
        assert_eq!(escalated.to_exit_code(), ExitCode::ESCALATED);

        let cancelled = BrdflowError::Phase(PhaseError::Cancelled {
            phase: PhaseId::Review,
        });
        assert_eq!(cancelled.to_exit_code(), ExitCode::CANCELLED);

        let failed = BrdflowError::Phase(PhaseError::Failed {
            phase: PhaseId::ProjectSetup,
            code: 201,
            message: "rejected".into(),
        });
        assert_eq!(failed.to_exit_code(), ExitCode::GATEWAY_FAILURE);
    }

    #[test]
    fn test_gate_timeout_mapping() {
        let err = BrdflowError::Gate(GateError::Timeout {
            gate: GateKind::A,
            waited_secs: 10,
        });
        assert_eq!(
            error_to_exit_code_and_kind(&err),
            (ExitCode::GATE_TIMEOUT, ErrorKind::GateTimeout)
        );
    }
}
