//! High-level service facade combining the store, lifecycle, availability, and catalog.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::lifecycle::{LifecycleController, next_states};
use crate::model::{
    Booking, BookingDetails, BookingDraft, BookingFilter, BookingId, BookingRequest,
    BookingState, BookingToken, CreatedBooking, Municipality, Principal, PublicBookingView, Role,
    StateChangeRecord,
};
use crate::ports::{BookingError, BookingStore, CatalogError, LocationCatalog};
use crate::schedule::{ScheduleConfig, SlotAvailabilityIndex};

/// Public entry point for citizens, staff, and anonymous token holders.
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    lifecycle: LifecycleController,
    availability: SlotAvailabilityIndex,
    catalog: Option<Arc<dyn LocationCatalog>>,
}

impl BookingService {
    /// Create a service bound to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, config: ScheduleConfig) -> Self {
        Self {
            lifecycle: LifecycleController::new(Arc::clone(&store)),
            availability: SlotAvailabilityIndex::new(Arc::clone(&store), clock, config),
            store,
            catalog: None,
        }
    }

    /// Attach a location catalog for the reference-data pass-through.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn LocationCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Grid configuration in use.
    #[must_use]
    pub fn schedule(&self) -> &ScheduleConfig {
        self.availability.config()
    }

    /// Create a booking for a citizen.
    ///
    /// A [`BookingError::SlotConflict`] means another request took the slot after the
    /// caller checked availability; re-query and pick another time.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Forbidden`] for non-citizens, [`BookingError::Validation`]
    /// for incomplete input or slots off the grid, and the store's reservation errors.
    pub async fn create_booking(
        &self,
        principal: &Principal,
        request: BookingRequest,
    ) -> Result<CreatedBooking, BookingError> {
        if principal.role != Role::Citizen {
            return Err(BookingError::forbidden("only citizens can create bookings"));
        }
        info!(principal = %principal, "Booking requested");

        let draft = draft_from_request(principal, request)?;
        if let Err(err) = self.availability.check_requested_slot(draft.date, draft.time) {
            warn!(principal = %principal, error = %err, "Booking request rejected");
            return Err(err);
        }

        let slot = draft.slot_key();
        match self
            .store
            .create(draft, self.availability.config().daily_capacity)
            .await
        {
            Ok(booking) => {
                info!(
                    booking_id = %booking.id,
                    slot = %slot,
                    principal = %principal,
                    "Booking created"
                );
                Ok(CreatedBooking {
                    token: booking.token.clone(),
                    booking,
                })
            }
            Err(err) => {
                warn!(slot = %slot, principal = %principal, error = %err, "Booking not created");
                Err(err)
            }
        }
    }

    /// Cancel a booking on behalf of its requester.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`], [`BookingError::Forbidden`] when the principal
    /// does not own the booking, or [`BookingError::InvalidTransition`].
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        principal: &Principal,
    ) -> Result<Booking, BookingError> {
        let booking = self.store.get(booking_id).await?;
        if !principal.owns(&booking) {
            warn!(booking_id = %booking_id, principal = %principal, "Cancellation rejected");
            return Err(BookingError::forbidden(
                "only the requester can cancel this booking",
            ));
        }
        self.lifecycle
            .request_transition(booking_id, BookingState::Canceled, principal)
            .await
    }

    /// Staff entry point for lifecycle transitions.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Forbidden`] for non-staff principals, otherwise whatever
    /// the lifecycle controller reports.
    pub async fn update_state(
        &self,
        booking_id: BookingId,
        target: BookingState,
        principal: &Principal,
    ) -> Result<Booking, BookingError> {
        if !principal.may_operate() {
            return Err(BookingError::forbidden("only staff can update booking states"));
        }
        self.lifecycle
            .request_transition(booking_id, target, principal)
            .await
    }

    /// Public projection of the booking behind `token`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for unknown or blank tokens.
    pub async fn lookup_by_token(&self, token: &str) -> Result<PublicBookingView, BookingError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(BookingError::NotFound("booking".to_owned()));
        }
        let booking = self
            .store
            .get_by_token(&BookingToken(token.to_owned()))
            .await?;
        Ok(PublicBookingView::from(booking))
    }

    /// Bookings owned by a citizen, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Forbidden`] for non-citizens and store errors unchanged.
    pub async fn list_own(&self, principal: &Principal) -> Result<Vec<Booking>, BookingError> {
        if principal.role != Role::Citizen {
            return Err(BookingError::forbidden("only citizens own bookings"));
        }
        let mut bookings = self.store.list_by_requester(&principal.id).await?;
        bookings.sort_by(|left, right| {
            right
                .created_at
                .cmp(&left.created_at)
                .then(right.id.cmp(&left.id))
        });
        Ok(bookings)
    }

    /// All bookings matching `filter`, regardless of requester, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Forbidden`] for non-staff principals.
    pub async fn list_for_staff(
        &self,
        principal: &Principal,
        filter: &BookingFilter,
    ) -> Result<Vec<Booking>, BookingError> {
        if !principal.may_operate() {
            return Err(BookingError::forbidden("only staff can list all bookings"));
        }
        let mut bookings = self.store.list_by_filter(filter).await?;
        bookings.sort_by_key(|booking| booking.id);
        Ok(bookings)
    }

    /// Free slot starts for a municipality and day.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] for a blank municipality or a past date.
    pub async fn available_slots(
        &self,
        municipality: &str,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, BookingError> {
        self.availability.available_slots(municipality, date).await
    }

    /// Booking, audit trail, and the states the caller may request next.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`], or [`BookingError::Forbidden`] when the caller
    /// is neither staff nor the requester.
    pub async fn booking_details(
        &self,
        booking_id: BookingId,
        principal: &Principal,
    ) -> Result<BookingDetails, BookingError> {
        let booking = self.readable_booking(booking_id, principal).await?;
        let history = self.store.history(booking_id).await?;
        let next_states = next_states(principal, &booking);
        Ok(BookingDetails {
            booking,
            history,
            next_states,
        })
    }

    /// Audit trail of a booking, oldest first.
    ///
    /// # Errors
    ///
    /// Same as [`BookingService::booking_details`].
    pub async fn history(
        &self,
        booking_id: BookingId,
        principal: &Principal,
    ) -> Result<Vec<StateChangeRecord>, BookingError> {
        self.readable_booking(booking_id, principal).await?;
        self.store.history(booking_id).await
    }

    /// District names from the location catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] without a catalog, or the catalog's error.
    pub async fn districts(&self) -> Result<Vec<String>, CatalogError> {
        self.catalog()?.districts().await
    }

    /// Municipalities from the location catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] without a catalog, or the catalog's error.
    pub async fn municipalities(
        &self,
        district: Option<&str>,
    ) -> Result<Vec<Municipality>, CatalogError> {
        self.catalog()?.municipalities(district).await
    }

    /// Villages of a municipality from the location catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] without a catalog, or the catalog's error.
    pub async fn villages(&self, municipality: &str) -> Result<Vec<String>, CatalogError> {
        self.catalog()?.villages(municipality).await
    }

    fn catalog(&self) -> Result<&Arc<dyn LocationCatalog>, CatalogError> {
        self.catalog.as_ref().ok_or(CatalogError::Unavailable)
    }

    async fn readable_booking(
        &self,
        booking_id: BookingId,
        principal: &Principal,
    ) -> Result<Booking, BookingError> {
        let booking = self.store.get(booking_id).await?;
        if principal.may_operate() || principal.owns(&booking) {
            Ok(booking)
        } else {
            Err(BookingError::forbidden(
                "booking belongs to another requester",
            ))
        }
    }
}

fn draft_from_request(
    principal: &Principal,
    request: BookingRequest,
) -> Result<BookingDraft, BookingError> {
    let location = request.location.trimmed();
    if let Some(field) = location.first_blank_field() {
        return Err(BookingError::validation(format!("{field} is required")));
    }
    let description = request.description.trim();
    if description.is_empty() {
        return Err(BookingError::validation("description is required"));
    }
    Ok(BookingDraft {
        requester_id: principal.id.clone(),
        location,
        date: request.date,
        time: request.time,
        description: description.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Location;

    fn request(location: Location, description: &str) -> BookingRequest {
        BookingRequest {
            location,
            date: NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date"),
            time: NaiveTime::from_hms_opt(9, 0, 0).expect("valid time"),
            description: description.to_owned(),
        }
    }

    #[test]
    fn drafts_are_trimmed_and_owned_by_the_caller() {
        let principal = Principal::citizen("alice@example.pt");
        let draft = draft_from_request(
            &principal,
            request(
                Location::new(" Lisboa ", "Lisboa\t", "Alvalade", "1700-001"),
                "  fridge ",
            ),
        )
        .expect("complete request");

        assert_eq!(draft.requester_id, principal.id);
        assert_eq!(draft.location.municipality, "Lisboa");
        assert_eq!(draft.description, "fridge");
    }

    #[test]
    fn blank_fields_are_named_in_the_error() {
        let principal = Principal::citizen("alice@example.pt");

        assert_eq!(
            draft_from_request(
                &principal,
                request(Location::new("Lisboa", "Lisboa", "Alvalade", " "), "fridge")
            ),
            Err(BookingError::Validation("postalCode is required".to_owned()))
        );
        assert_eq!(
            draft_from_request(
                &principal,
                request(Location::new("Lisboa", "Lisboa", "Alvalade", "1700"), "")
            ),
            Err(BookingError::Validation("description is required".to_owned()))
        );
    }

    #[test]
    fn booking_requests_deserialize_from_flat_json() {
        let raw = r#"{
            "district": "Porto",
            "municipality": "Porto",
            "village": "Bonfim",
            "postalCode": "4000-001",
            "date": "2025-06-11",
            "time": "14:00:00",
            "description": "mattress"
        }"#;
        let parsed: BookingRequest = serde_json::from_str(raw).expect("valid request json");

        assert_eq!(parsed.location.postal_code, "4000-001");
        assert_eq!(parsed.time, NaiveTime::from_hms_opt(14, 0, 0).expect("valid time"));
    }
}
