//! User-facing messages for operation outcomes.

use mkt_core::error::MktError;

/// Message shown to the user for a failed operation.
///
/// Every expected error kind gets its own wording; infrastructure failures
/// share one generic message.
pub fn describe(err: &MktError) -> String {
    match err {
        MktError::IllegalTransition { from, to } => {
            format!("This booking is {from} and cannot be changed to {to}.")
        }
        MktError::Forbidden(reason) => format!("You can't do that: {reason}."),
        MktError::StaleStateConflict {
            attempted, current, ..
        } => describe_conflict(attempted, current.as_deref()),
        MktError::NotFound(what) => format!("We couldn't find {what}."),
        MktError::AlreadyReviewed(_) => "You have already reviewed this booking.".into(),
        MktError::InvalidInput(reason) => format!("Please check your input: {reason}."),
        MktError::TransportDisconnected => {
            "Live updates stopped. Showing the last loaded data; refresh to try again.".into()
        }
        _ => "Something went wrong. Please try again.".into(),
    }
}

fn describe_conflict(attempted: &str, current: Option<&str>) -> String {
    match attempted {
        "accepted" | "declined" => "This booking was already responded to.".into(),
        "cancelled" => match current {
            Some(status) => format!("This booking can no longer be cancelled; it is now {status}."),
            None => "This booking can no longer be cancelled.".into(),
        },
        _ => match current {
            Some(status) => format!("This booking changed while you were viewing it; it is now {status}."),
            None => "This booking changed while you were viewing it.".into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(attempted: &str, current: Option<&str>) -> MktError {
        MktError::StaleStateConflict {
            booking_id: "b".into(),
            attempted: attempted.into(),
            current: current.map(String::from),
        }
    }

    #[test]
    fn test_accept_conflict_wording() {
        assert_eq!(
            describe(&conflict("accepted", Some("cancelled"))),
            "This booking was already responded to."
        );
        assert_eq!(
            describe(&conflict("declined", None)),
            "This booking was already responded to."
        );
    }

    #[test]
    fn test_illegal_transition_reads_for_any_status() {
        let illegal = |from: &str, to: &str| MktError::IllegalTransition {
            from: from.into(),
            to: to.into(),
        };
        assert_eq!(
            describe(&illegal("accepted", "pending")),
            "This booking is accepted and cannot be changed to pending."
        );
        assert_eq!(
            describe(&illegal("completed", "cancelled")),
            "This booking is completed and cannot be changed to cancelled."
        );
    }

    #[test]
    fn test_cancel_conflict_names_current_status() {
        assert_eq!(
            describe(&conflict("cancelled", Some("accepted"))),
            "This booking can no longer be cancelled; it is now accepted."
        );
    }

    #[test]
    fn test_expected_kinds_are_distinct_and_specific() {
        let errors = [
            MktError::IllegalTransition {
                from: "completed".into(),
                to: "cancelled".into(),
            },
            MktError::Forbidden("only the provider can accept".into()),
            conflict("completed", Some("cancelled")),
            MktError::NotFound("booking b".into()),
            MktError::AlreadyReviewed("b".into()),
            MktError::InvalidInput("rating must be between 1 and 5".into()),
            MktError::TransportDisconnected,
        ];
        let generic = describe(&MktError::Database("locked".into()));

        let messages: Vec<String> = errors.iter().map(describe).collect();
        for (i, message) in messages.iter().enumerate() {
            assert_ne!(*message, generic, "{message}");
            for other in &messages[i + 1..] {
                assert_ne!(message, other);
            }
        }
    }
}
