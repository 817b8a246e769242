//! Traits describing storage and catalog collaborators, plus the shared error taxonomy.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use reqwest::Error as ReqwestError;

use crate::model::{
    Booking, BookingDraft, BookingFilter, BookingId, BookingState, BookingToken, Municipality,
    Principal, PrincipalId, SlotKey, StateChangeRecord,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Typed failures returned by the booking engine. The engine never retries internally.
pub enum BookingError {
    /// Missing or malformed input.
    #[error("Validation failed: {0}")]
    Validation(String),
    /// The slot was taken by another active booking.
    #[error("Slot no longer available: {0}")]
    SlotConflict(SlotKey),
    /// The municipality has no capacity left on that day.
    #[error("Daily capacity reached for {municipality} on {date}")]
    CapacityReached {
        /// Municipality that is full.
        municipality: String,
        /// Day that is full.
        date: NaiveDate,
    },
    /// The requested edge is not in the transition graph from the current state.
    #[error("Invalid state transition: {from} to {to}")]
    InvalidTransition {
        /// Current state of the booking.
        from: BookingState,
        /// Requested target state.
        to: BookingState,
    },
    /// Role or ownership check failed.
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// Unknown booking id or token.
    #[error("{0} not found")]
    NotFound(String),
    /// Transient storage backend failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl BookingError {
    /// Whether a well-behaved client may retry after re-checking availability.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingError::SlotConflict(_)
                | BookingError::CapacityReached { .. }
                | BookingError::Store(_)
        )
    }

    pub(crate) fn validation<S: Into<String>>(message: S) -> Self {
        BookingError::Validation(message.into())
    }

    pub(crate) fn forbidden<S: Into<String>>(message: S) -> Self {
        BookingError::Forbidden(message.into())
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while talking to the location catalog.
pub enum CatalogError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// No catalog is configured.
    #[error("Location catalog unavailable")]
    Unavailable,
    /// Internal catalog error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Optimistic transition request applied by the store.
pub struct Transition {
    /// Booking to mutate.
    pub booking_id: BookingId,
    /// State the caller validated against.
    pub expected: BookingState,
    /// Requested state.
    pub target: BookingState,
    /// Who requested the change.
    pub changed_by: Principal,
}

#[async_trait]
/// Durable mapping of bookings and their audit histories.
///
/// Implementations must make `create` and `apply_transition` atomic: the slot check and
/// the insert happen in one critical section, and the state write and history append
/// happen in one critical section.
pub trait BookingStore: Send + Sync {
    /// Reserve the draft's slot and persist a new `RECEIVED` booking.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::SlotConflict`] when an active booking holds the slot and
    /// [`BookingError::CapacityReached`] when `daily_capacity` active bookings already
    /// exist for the municipality and day.
    async fn create(
        &self,
        draft: BookingDraft,
        daily_capacity: Option<usize>,
    ) -> Result<Booking, BookingError>;

    /// Fetch a booking by id.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for unknown ids.
    async fn get(&self, id: BookingId) -> Result<Booking, BookingError>;

    /// Fetch a booking by its lookup token.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for unknown tokens.
    async fn get_by_token(&self, token: &BookingToken) -> Result<Booking, BookingError>;

    /// All bookings owned by `requester`, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`] when the backend fails.
    async fn list_by_requester(&self, requester: &PrincipalId)
    -> Result<Vec<Booking>, BookingError>;

    /// All bookings matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`] when the backend fails.
    async fn list_by_filter(&self, filter: &BookingFilter) -> Result<Vec<Booking>, BookingError>;

    /// Slot starts held by active bookings for `(municipality, date)`.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Store`] when the backend fails.
    async fn held_slots(
        &self,
        municipality: &str,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, BookingError>;

    /// Persist a state change and append exactly one audit record.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::InvalidTransition`] when the booking is no longer in
    /// `expected` or the edge is not in the graph, and [`BookingError::NotFound`] for
    /// unknown ids.
    async fn apply_transition(&self, transition: Transition) -> Result<Booking, BookingError>;

    /// Audit history of a booking, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::NotFound`] for unknown ids.
    async fn history(&self, id: BookingId) -> Result<Vec<StateChangeRecord>, BookingError>;
}

#[async_trait]
/// Read-only geographic reference data.
pub trait LocationCatalog: Send + Sync {
    /// All district names, sorted.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] when the catalog request fails.
    async fn districts(&self) -> Result<Vec<String>, CatalogError>;

    /// Municipalities, optionally restricted to one district, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] when the catalog request fails.
    async fn municipalities(
        &self,
        district: Option<&str>,
    ) -> Result<Vec<Municipality>, CatalogError>;

    /// Villages (parishes) of a municipality.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] when the catalog request fails.
    async fn villages(&self, municipality: &str) -> Result<Vec<String>, CatalogError>;
}
