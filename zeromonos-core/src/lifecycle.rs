//! Transition graph and role-gated lifecycle controller.
//!
//! The graph below is the only place where permitted transitions are written down. Both
//! enforcement ([`LifecycleController::request_transition`]) and the "what can I do next"
//! query ([`next_states`]) read it.

use std::sync::Arc;

use tracing::{info, warn};

use crate::model::{Booking, BookingId, BookingState, Principal, StateChangeRecord};
use crate::ports::{BookingError, BookingStore, Transition};

/// The one edge a citizen may take on their own booking.
const OWNER_CANCEL: (BookingState, BookingState) = (BookingState::Received, BookingState::Canceled);

impl BookingState {
    /// Every state, in lifecycle order.
    pub const ALL: [BookingState; 5] = [
        BookingState::Received,
        BookingState::Assigned,
        BookingState::InProgress,
        BookingState::Done,
        BookingState::Canceled,
    ];

    /// Direct successors in the transition graph.
    #[must_use]
    pub const fn successors(self) -> &'static [BookingState] {
        match self {
            BookingState::Received => &[BookingState::Assigned, BookingState::Canceled],
            BookingState::Assigned => &[BookingState::InProgress, BookingState::Canceled],
            BookingState::InProgress => &[BookingState::Done, BookingState::Canceled],
            BookingState::Done | BookingState::Canceled => &[],
        }
    }

    /// Whether `target` is a direct successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, target: BookingState) -> bool {
        self.successors().contains(&target)
    }

    /// Whether no transition leaves this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Replay an audit trail from `RECEIVED`.
    ///
    /// Returns `None` when the records do not form a chain of graph edges.
    #[must_use]
    pub fn replay(records: &[StateChangeRecord]) -> Option<BookingState> {
        records
            .iter()
            .try_fold(BookingState::Received, |current, record| {
                (record.from_state == current && current.can_transition_to(record.to_state))
                    .then_some(record.to_state)
            })
    }
}

/// Ensure `from -> to` is an edge of the graph.
///
/// # Errors
///
/// Returns [`BookingError::InvalidTransition`] otherwise.
pub fn ensure_edge(from: BookingState, to: BookingState) -> Result<(), BookingError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition { from, to })
    }
}

/// Check whether `principal` may move `booking` to `target`.
///
/// Staff may take any edge. A citizen may only cancel their own booking while it is
/// `RECEIVED`. Edges missing from the graph are reported as invalid transitions, edges
/// present but outside the principal's capability as forbidden.
///
/// # Errors
///
/// Returns [`BookingError::Forbidden`] or [`BookingError::InvalidTransition`].
pub fn authorize(
    principal: &Principal,
    booking: &Booking,
    target: BookingState,
) -> Result<(), BookingError> {
    if principal.may_operate() {
        return ensure_edge(booking.state, target);
    }
    if !principal.owns(booking) {
        return Err(BookingError::forbidden(
            "booking belongs to another requester",
        ));
    }
    if target != OWNER_CANCEL.1 {
        return Err(BookingError::forbidden(format!(
            "requesters may only cancel, not move to {target}"
        )));
    }
    ensure_edge(booking.state, target)?;
    if booking.state != OWNER_CANCEL.0 {
        return Err(BookingError::forbidden(format!(
            "requesters may only cancel bookings in {}",
            OWNER_CANCEL.0
        )));
    }
    Ok(())
}

/// States `principal` may request next for `booking`.
#[must_use]
pub fn next_states(principal: &Principal, booking: &Booking) -> Vec<BookingState> {
    booking
        .state
        .successors()
        .iter()
        .copied()
        .filter(|target| authorize(principal, booking, *target).is_ok())
        .collect()
}

/// Validates and applies lifecycle transitions against a [`BookingStore`].
pub struct LifecycleController {
    store: Arc<dyn BookingStore>,
}

impl LifecycleController {
    /// Create a controller writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Move a booking to `target` on behalf of `principal`.
    ///
    /// The store re-checks the current state inside its critical section, so a
    /// concurrent transition that lands first turns this request into an
    /// [`BookingError::InvalidTransition`].
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`], [`BookingError::Forbidden`] or
    /// [`BookingError::InvalidTransition`].
    pub async fn request_transition(
        &self,
        booking_id: BookingId,
        target: BookingState,
        principal: &Principal,
    ) -> Result<Booking, BookingError> {
        let booking = self.store.get(booking_id).await?;

        if let Err(err) = authorize(principal, &booking, target) {
            warn!(
                booking_id = %booking_id,
                from = %booking.state,
                to = %target,
                principal = %principal,
                error = %err,
                "Transition rejected"
            );
            return Err(err);
        }

        let updated = self
            .store
            .apply_transition(Transition {
                booking_id,
                expected: booking.state,
                target,
                changed_by: principal.clone(),
            })
            .await?;

        info!(
            booking_id = %booking_id,
            from = %booking.state,
            to = %updated.state,
            principal = %principal,
            "Booking state updated"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::model::{BookingToken, Location, PrincipalId};

    fn booking_in(state: BookingState) -> Booking {
        let now = Utc::now();
        Booking {
            id: BookingId(1),
            token: BookingToken("tok".to_owned()),
            requester_id: PrincipalId("alice@example.pt".to_owned()),
            location: Location::new("Lisboa", "Lisboa", "Alvalade", "1700-001"),
            date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap_or_default(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            description: "old sofa".to_owned(),
            state,
            created_at: now,
            updated_at: now,
        }
    }

    fn record(from: BookingState, to: BookingState) -> StateChangeRecord {
        StateChangeRecord {
            booking_id: BookingId(1),
            from_state: from,
            to_state: to,
            changed_by: Principal::staff("op"),
            timestamp: Utc::now(),
        }
    }

    fn any_state() -> impl Strategy<Value = BookingState> {
        prop::sample::select(BookingState::ALL.to_vec())
    }

    #[test]
    fn graph_matches_lifecycle() {
        use BookingState::{Assigned, Canceled, Done, InProgress, Received};

        assert_eq!(Received.successors(), &[Assigned, Canceled]);
        assert_eq!(Assigned.successors(), &[InProgress, Canceled]);
        assert_eq!(InProgress.successors(), &[Done, Canceled]);
        assert!(Done.is_terminal(), "DONE is terminal");
        assert!(Canceled.is_terminal(), "CANCELED is terminal");
    }

    #[test]
    fn owner_may_cancel_received_only() {
        let owner = Principal::citizen("alice@example.pt");

        assert_eq!(
            authorize(&owner, &booking_in(BookingState::Received), BookingState::Canceled),
            Ok(())
        );
        assert!(matches!(
            authorize(&owner, &booking_in(BookingState::Assigned), BookingState::Canceled),
            Err(BookingError::Forbidden(_))
        ));
        assert!(matches!(
            authorize(&owner, &booking_in(BookingState::Canceled), BookingState::Canceled),
            Err(BookingError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn stranger_is_forbidden_regardless_of_target() {
        let stranger = Principal::citizen("bob@example.pt");
        for target in BookingState::ALL {
            assert!(
                matches!(
                    authorize(&stranger, &booking_in(BookingState::Received), target),
                    Err(BookingError::Forbidden(_))
                ),
                "{target} must be forbidden for a stranger"
            );
        }
    }

    #[test]
    fn next_states_follow_capabilities() {
        let received = booking_in(BookingState::Received);

        assert_eq!(
            next_states(&Principal::staff("op"), &received),
            vec![BookingState::Assigned, BookingState::Canceled]
        );
        assert_eq!(
            next_states(&Principal::citizen("alice@example.pt"), &received),
            vec![BookingState::Canceled]
        );
        assert!(next_states(&Principal::citizen("bob@example.pt"), &received).is_empty());
        assert!(
            next_states(&Principal::staff("op"), &booking_in(BookingState::Done)).is_empty()
        );
    }

    #[test]
    fn replay_rejects_broken_chains() {
        let happy = [
            record(BookingState::Received, BookingState::Assigned),
            record(BookingState::Assigned, BookingState::InProgress),
            record(BookingState::InProgress, BookingState::Done),
        ];
        assert_eq!(BookingState::replay(&happy), Some(BookingState::Done));
        assert_eq!(BookingState::replay(&[]), Some(BookingState::Received));

        let gap = [
            record(BookingState::Received, BookingState::Assigned),
            record(BookingState::InProgress, BookingState::Done),
        ];
        assert_eq!(BookingState::replay(&gap), None);
    }

    proptest! {
        #[test]
        fn staff_succeeds_iff_direct_successor(from in any_state(), to in any_state()) {
            let result = authorize(&Principal::staff("op"), &booking_in(from), to);
            prop_assert_eq!(result.is_ok(), from.successors().contains(&to));
            if from.is_terminal() {
                prop_assert_eq!(result, Err(BookingError::InvalidTransition { from, to }));
            }
        }

        #[test]
        fn citizen_never_gets_a_non_cancel_edge(from in any_state(), to in any_state()) {
            prop_assume!(to != BookingState::Canceled);
            let result = authorize(&Principal::citizen("alice@example.pt"), &booking_in(from), to);
            prop_assert!(matches!(result, Err(BookingError::Forbidden(_))));
        }

        #[test]
        fn accepted_walks_never_regress(choices in prop::collection::vec(0_usize..2, 0..6)) {
            let mut state = BookingState::Received;
            let mut trail = Vec::new();
            for choice in choices {
                let Some(next) = state.successors().get(choice).copied() else {
                    break;
                };
                trail.push(record(state, next));
                prop_assert!(
                    BookingState::ALL.iter().position(|candidate| *candidate == next)
                        > BookingState::ALL.iter().position(|candidate| *candidate == state)
                );
                state = next;
            }
            prop_assert_eq!(BookingState::replay(&trail), Some(state));
        }
    }
}
