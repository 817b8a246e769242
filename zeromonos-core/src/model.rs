//! Domain data structures for bookings, locations, principals, and audit records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Stable identifier of a booking, assigned by the store and never reused.
pub struct BookingId(pub u64);

impl fmt::Display for BookingId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Opaque token granting anonymous read access to exactly one booking.
pub struct BookingToken(pub String);

impl BookingToken {
    /// Borrow the raw token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Identifier of an authenticated principal (citizen or staff member).
pub struct PrincipalId(pub String);

impl fmt::Display for PrincipalId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Role resolved by the authentication collaborator.
pub enum Role {
    /// Requester who books collections for their own address.
    Citizen,
    /// Operator who moves bookings through the lifecycle.
    Staff,
}

impl fmt::Display for Role {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Citizen => "CITIZEN",
            Role::Staff => "STAFF",
        };
        write!(formatter, "{label}")
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown role: {0}")]
/// Raised when a role label is neither `CITIZEN` nor `STAFF`.
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CITIZEN" => Ok(Role::Citizen),
            "STAFF" => Ok(Role::Staff),
            _ => Err(UnknownRole(raw.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Verified identity plus role, as handed over by the authentication collaborator.
pub struct Principal {
    /// Principal identifier.
    pub id: PrincipalId,
    /// Role granted to the principal.
    pub role: Role,
}

impl Principal {
    /// Build a citizen principal.
    #[must_use]
    pub fn citizen<S: Into<String>>(id: S) -> Self {
        Self {
            id: PrincipalId(id.into()),
            role: Role::Citizen,
        }
    }

    /// Build a staff principal.
    #[must_use]
    pub fn staff<S: Into<String>>(id: S) -> Self {
        Self {
            id: PrincipalId(id.into()),
            role: Role::Staff,
        }
    }

    /// Capability check: may operate on any booking.
    #[must_use]
    pub fn may_operate(&self) -> bool {
        self.role == Role::Staff
    }

    /// Capability check: is the citizen who requested `booking`.
    #[must_use]
    pub fn owns(&self, booking: &Booking) -> bool {
        self.role == Role::Citizen && self.id == booking.requester_id
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.role, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Collection address. Immutable once a booking is created.
pub struct Location {
    /// District name.
    pub district: String,
    /// Municipality name; part of the slot uniqueness key.
    pub municipality: String,
    /// Village or parish name.
    pub village: String,
    /// Postal code as entered by the requester.
    pub postal_code: String,
}

impl Location {
    /// Construct a location from its parts.
    #[must_use]
    pub fn new<D, M, V, P>(district: D, municipality: M, village: V, postal_code: P) -> Self
    where
        D: Into<String>,
        M: Into<String>,
        V: Into<String>,
        P: Into<String>,
    {
        Self {
            district: district.into(),
            municipality: municipality.into(),
            village: village.into(),
            postal_code: postal_code.into(),
        }
    }

    /// Copy with surrounding whitespace removed from every field.
    #[must_use]
    pub fn trimmed(&self) -> Self {
        Self::new(
            self.district.trim(),
            self.municipality.trim(),
            self.village.trim(),
            self.postal_code.trim(),
        )
    }

    /// Name of the first blank field, if any.
    #[must_use]
    pub fn first_blank_field(&self) -> Option<&'static str> {
        [
            ("district", &self.district),
            ("municipality", &self.municipality),
            ("village", &self.village),
            ("postalCode", &self.postal_code),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Uniqueness boundary for double-booking prevention.
pub struct SlotKey {
    /// Municipality the slot belongs to.
    pub municipality: String,
    /// Collection day.
    pub date: NaiveDate,
    /// Start of the slot.
    pub time: NaiveTime,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} {} {}",
            self.municipality,
            self.date,
            self.time.format("%H:%M")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// Lifecycle state of a booking.
pub enum BookingState {
    /// Initial state after creation.
    Received,
    /// An operator took the booking.
    Assigned,
    /// Collection is underway.
    InProgress,
    /// Collection completed (terminal).
    Done,
    /// Booking withdrawn (terminal).
    Canceled,
}

impl fmt::Display for BookingState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BookingState::Received => "RECEIVED",
            BookingState::Assigned => "ASSIGNED",
            BookingState::InProgress => "IN_PROGRESS",
            BookingState::Done => "DONE",
            BookingState::Canceled => "CANCELED",
        };
        write!(formatter, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Citizen input for a new booking.
pub struct BookingRequest {
    /// Collection address.
    #[serde(flatten)]
    pub location: Location,
    /// Requested day.
    pub date: NaiveDate,
    /// Requested slot start.
    pub time: NaiveTime,
    /// What should be collected.
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Validated booking data handed to the store for reservation.
pub struct BookingDraft {
    /// Owning citizen.
    pub requester_id: PrincipalId,
    /// Collection address.
    pub location: Location,
    /// Requested day.
    pub date: NaiveDate,
    /// Requested slot start.
    pub time: NaiveTime,
    /// What should be collected.
    pub description: String,
}

impl BookingDraft {
    /// Slot this draft wants to reserve.
    #[must_use]
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            municipality: self.location.municipality.clone(),
            date: self.date,
            time: self.time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A waste collection appointment.
pub struct Booking {
    /// Store-assigned identifier.
    pub id: BookingId,
    /// Anonymous lookup token.
    pub token: BookingToken,
    /// Owning citizen.
    pub requester_id: PrincipalId,
    /// Collection address.
    pub location: Location,
    /// Collection day.
    pub date: NaiveDate,
    /// Slot start.
    pub time: NaiveTime,
    /// What should be collected.
    pub description: String,
    /// Current lifecycle state.
    pub state: BookingState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last accepted transition.
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Slot held by this booking while it is active.
    #[must_use]
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            municipality: self.location.municipality.clone(),
            date: self.date,
            time: self.time,
        }
    }

    /// Whether the booking still holds its slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state != BookingState::Canceled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Append-only audit entry written for every accepted transition.
pub struct StateChangeRecord {
    /// Booking the change applies to.
    pub booking_id: BookingId,
    /// State before the transition.
    pub from_state: BookingState,
    /// State after the transition.
    pub to_state: BookingState,
    /// Who requested the transition.
    pub changed_by: Principal,
    /// When the transition was committed.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
/// Disclosure-limited projection returned to anonymous token holders.
pub struct PublicBookingView {
    /// Lookup token.
    pub token: BookingToken,
    /// District name.
    pub district: String,
    /// Municipality name.
    pub municipality: String,
    /// Village or parish name.
    pub village: String,
    /// Postal code.
    pub postal_code: String,
    /// Collection day.
    pub date: NaiveDate,
    /// Slot start.
    pub time: NaiveTime,
    /// What should be collected.
    pub description: String,
    /// Current lifecycle state.
    pub state: BookingState,
}

impl From<Booking> for PublicBookingView {
    fn from(booking: Booking) -> Self {
        let Booking {
            token,
            location,
            date,
            time,
            description,
            state,
            ..
        } = booking;
        Self {
            token,
            district: location.district,
            municipality: location.municipality,
            village: location.village,
            postal_code: location.postal_code,
            date,
            time,
            description,
            state,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
/// Staff listing filter; present criteria compose with logical AND.
pub struct BookingFilter {
    /// Exact district match.
    pub district: Option<String>,
    /// Exact municipality match.
    pub municipality: Option<String>,
}

impl BookingFilter {
    /// Whether `booking` satisfies every present criterion.
    #[must_use]
    pub fn matches(&self, booking: &Booking) -> bool {
        let wanted = |criterion: Option<&String>, actual: &str| {
            criterion
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .is_none_or(|value| value == actual)
        };
        wanted(self.district.as_ref(), &booking.location.district)
            && wanted(self.municipality.as_ref(), &booking.location.municipality)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
/// Result of a successful creation.
pub struct CreatedBooking {
    /// The stored booking.
    pub booking: Booking,
    /// Token to hand back to the requester.
    pub token: BookingToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
/// Booking with its audit trail and the moves available to the caller.
pub struct BookingDetails {
    /// The booking.
    pub booking: Booking,
    /// State changes, oldest first.
    pub history: Vec<StateChangeRecord>,
    /// States the caller may request next.
    pub next_states: Vec<BookingState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Municipality entry from the location catalog.
pub struct Municipality {
    /// Municipality name.
    pub name: String,
    /// District the municipality belongs to.
    pub district: String,
}
