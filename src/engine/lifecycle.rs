use crate::model::BookingStatus;

use super::EngineError;

/// Legal booking moves. Completed and Cancelled have no way out.
pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
    )
}

/// Check a requested move; illegal ones are rejected, never coerced.
pub fn transition(from: BookingStatus, to: BookingStatus) -> Result<BookingStatus, EngineError> {
    if can_transition(from, to) {
        Ok(to)
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

/// Statuses a booking may be created in.
pub fn valid_initial(status: BookingStatus) -> bool {
    status.is_active()
}

/// Where a booking can go next, for UIs that render action buttons.
pub fn next_statuses(from: BookingStatus) -> Vec<BookingStatus> {
    BookingStatus::ALL
        .into_iter()
        .filter(|&to| can_transition(from, to))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    const LEGAL: [(BookingStatus, BookingStatus); 4] = [
        (Pending, Confirmed),
        (Pending, Cancelled),
        (Confirmed, Completed),
        (Confirmed, Cancelled),
    ];

    #[test]
    fn legal_transitions_succeed() {
        for (from, to) in LEGAL {
            assert_eq!(transition(from, to).unwrap(), to);
        }
    }

    #[test]
    fn every_other_pair_is_invalid() {
        for from in BookingStatus::ALL {
            for to in BookingStatus::ALL {
                if LEGAL.contains(&(from, to)) {
                    continue;
                }
                assert_eq!(
                    transition(from, to),
                    Err(EngineError::InvalidTransition { from, to }),
                    "{from} -> {to} should be rejected"
                );
            }
        }
    }

    #[test]
    fn terminal_states_are_dead_ends() {
        assert!(next_statuses(Completed).is_empty());
        assert!(next_statuses(Cancelled).is_empty());
        assert_eq!(next_statuses(Pending), vec![Confirmed, Cancelled]);
        assert_eq!(next_statuses(Confirmed), vec![Completed, Cancelled]);
    }

    #[test]
    fn completed_cannot_be_reconfirmed() {
        let err = transition(Completed, Confirmed).unwrap_err();
        assert_eq!(err.to_string(), "cannot move booking from completed to confirmed");
    }

    #[test]
    fn only_active_initial_statuses() {
        assert!(valid_initial(Pending));
        assert!(valid_initial(Confirmed));
        assert!(!valid_initial(Completed));
        assert!(!valid_initial(Cancelled));
    }
}
