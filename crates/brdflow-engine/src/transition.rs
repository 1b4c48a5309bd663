use brdflow_utils::error::PhaseError;
use brdflow_utils::types::PhaseId;

/// Check that the state machine may move from `from` to `to`.
///
/// Legal moves are the forward step, staying put (review edits, resumed
/// phases) and the review reject back-edge to parse.
///
/// # Errors
///
/// [`PhaseError::InvalidTransition`] for any other move.
pub fn validate_transition(from: PhaseId, to: PhaseId) -> Result<(), PhaseError> {
    let legal = from == to || from.next() == Some(to) || (from == PhaseId::Review && to == PhaseId::Parse);
    if legal {
        Ok(())
    } else {
        Err(PhaseError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_steps_are_legal() {
        for phase in PhaseId::ALL {
            if let Some(next) = phase.next() {
                validate_transition(phase, next).unwrap();
            }
        }
    }

    #[test]
    fn test_review_back_edges() {
        validate_transition(PhaseId::Review, PhaseId::Parse).unwrap();
        validate_transition(PhaseId::Review, PhaseId::Review).unwrap();
        assert!(validate_transition(PhaseId::Review, PhaseId::Structure).is_err());
    }

    #[test]
    fn test_skips_and_other_back_edges_are_rejected() {
        let err = validate_transition(PhaseId::Parse, PhaseId::Review).unwrap_err();
        assert!(matches!(
            err,
            PhaseError::InvalidTransition {
                from: PhaseId::Parse,
                to: PhaseId::Review
            }
        ));
        assert!(validate_transition(PhaseId::CreateVerify, PhaseId::Parse).is_err());
        assert!(validate_transition(PhaseId::Close, PhaseId::Auth).is_err());
    }
}
