//! In-memory booking store with a unique slot index and optional JSON snapshots.
//!
//! Every mutation runs under a single write lock, so the slot check and the insert in
//! `create`, and the state check, state write and history append in
//! `apply_transition`, each happen as one atomic unit.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use zeromonos_core::{
    clock::{Clock, TokenGenerator},
    lifecycle::ensure_edge,
    model::{
        Booking, BookingDraft, BookingFilter, BookingId, BookingState, BookingToken, PrincipalId,
        SlotKey, StateChangeRecord,
    },
    ports::{BookingError, BookingStore, Transition},
};

/// Token draws before giving up on finding an unused one.
const MAX_TOKEN_ATTEMPTS: usize = 4;

#[derive(thiserror::Error, Debug)]
/// Errors raised while loading a snapshot file.
pub enum SnapshotError {
    /// Reading the file failed.
    #[error("Snapshot IO error: {0}")]
    Io(#[from] io::Error),
    /// The file is not a valid snapshot document.
    #[error("Snapshot parse error: {0}")]
    Json(#[from] serde_json::Error),
    /// The file parsed but violates a store invariant.
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),
}

/// On-disk representation of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    last_id: u64,
    bookings: Vec<Booking>,
    history: Vec<StateChangeRecord>,
}

#[derive(Debug, Default)]
struct Tables {
    last_id: u64,
    bookings: BTreeMap<BookingId, Booking>,
    history: HashMap<BookingId, Vec<StateChangeRecord>>,
    tokens: HashMap<BookingToken, BookingId>,
    slots: HashMap<SlotKey, BookingId>,
}

impl Tables {
    fn from_snapshot(snapshot: Snapshot) -> Result<Self, SnapshotError> {
        let mut tables = Tables {
            last_id: snapshot.last_id,
            ..Tables::default()
        };

        for booking in snapshot.bookings {
            if tables.bookings.contains_key(&booking.id) {
                return Err(SnapshotError::Corrupt(format!(
                    "booking {} appears twice",
                    booking.id
                )));
            }
            if booking.id.0 > tables.last_id {
                return Err(SnapshotError::Corrupt(format!(
                    "booking {} is newer than the id counter",
                    booking.id
                )));
            }
            if tables
                .tokens
                .insert(booking.token.clone(), booking.id)
                .is_some()
            {
                return Err(SnapshotError::Corrupt(format!(
                    "token of booking {} is shared",
                    booking.id
                )));
            }
            if booking.is_active()
                && let Some(holder) = tables.slots.insert(booking.slot_key(), booking.id)
            {
                return Err(SnapshotError::Corrupt(format!(
                    "bookings {holder} and {} hold slot {}",
                    booking.id,
                    booking.slot_key()
                )));
            }
            tables.bookings.insert(booking.id, booking);
        }

        for record in snapshot.history {
            if !tables.bookings.contains_key(&record.booking_id) {
                return Err(SnapshotError::Corrupt(format!(
                    "history references unknown booking {}",
                    record.booking_id
                )));
            }
            tables
                .history
                .entry(record.booking_id)
                .or_default()
                .push(record);
        }

        for booking in tables.bookings.values() {
            let trail = tables
                .history
                .get(&booking.id)
                .map_or(&[][..], Vec::as_slice);
            if BookingState::replay(trail) != Some(booking.state) {
                return Err(SnapshotError::Corrupt(format!(
                    "history of booking {} does not replay to {}",
                    booking.id, booking.state
                )));
            }
        }

        Ok(tables)
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            last_id: self.last_id,
            bookings: self.bookings.values().cloned().collect(),
            history: self
                .bookings
                .keys()
                .filter_map(|id| self.history.get(id))
                .flatten()
                .cloned()
                .collect(),
        }
    }

    fn active_on(&self, municipality: &str, date: NaiveDate) -> impl Iterator<Item = &SlotKey> {
        self.slots
            .keys()
            .filter(move |slot| slot.municipality == municipality && slot.date == date)
    }

    fn find(&self, id: BookingId) -> Result<&Booking, BookingError> {
        self.bookings
            .get(&id)
            .ok_or_else(|| BookingError::NotFound(format!("booking {id}")))
    }
}

/// Booking store keeping all records in memory.
pub struct InMemoryBookingStore {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenGenerator>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryBookingStore {
    /// Create an empty, volatile store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, tokens: Arc<dyn TokenGenerator>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
            tokens,
            snapshot_path: None,
        }
    }

    /// Create a store backed by the snapshot file at `path`.
    ///
    /// A missing file starts an empty store; the file is written on the first mutation.
    ///
    /// # Errors
    ///
    /// Returns a [`SnapshotError`] when the file cannot be read or violates an invariant.
    pub async fn open(
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn TokenGenerator>,
    ) -> Result<Self, SnapshotError> {
        let path = path.as_ref().to_path_buf();
        let tables = match fs::read(&path).await {
            Ok(raw) => Tables::from_snapshot(serde_json::from_slice(&raw)?)?,
            Err(err) if err.kind() == ErrorKind::NotFound => Tables::default(),
            Err(err) => return Err(err.into()),
        };
        info!(
            path = %path.display(),
            bookings = tables.bookings.len(),
            "Booking snapshot loaded"
        );
        Ok(Self {
            tables: RwLock::new(tables),
            clock,
            tokens,
            snapshot_path: Some(path),
        })
    }

    fn fresh_token(&self, tables: &Tables) -> Result<BookingToken, BookingError> {
        (0..MAX_TOKEN_ATTEMPTS)
            .map(|_| self.tokens.generate())
            .find(|token| !tables.tokens.contains_key(token))
            .ok_or_else(|| BookingError::Store("could not allocate a unique token".to_owned()))
    }

    async fn persist(&self, tables: &Tables) -> Result<(), BookingError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let write = async {
            let raw = serde_json::to_vec_pretty(&tables.to_snapshot())
                .map_err(io::Error::other)?;
            let staging = path.with_extension("tmp");
            fs::write(&staging, raw).await?;
            fs::rename(&staging, path).await
        };
        write.await.map_err(|err: io::Error| {
            error!(path = %path.display(), error = %err, "Snapshot write failed");
            BookingError::Store(format!("snapshot write failed: {err}"))
        })
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn create(
        &self,
        draft: BookingDraft,
        daily_capacity: Option<usize>,
    ) -> Result<Booking, BookingError> {
        let mut tables = self.tables.write().await;

        let slot = draft.slot_key();
        if tables.slots.contains_key(&slot) {
            return Err(BookingError::SlotConflict(slot));
        }
        if let Some(limit) = daily_capacity
            && tables.active_on(&slot.municipality, slot.date).count() >= limit
        {
            return Err(BookingError::CapacityReached {
                municipality: slot.municipality,
                date: slot.date,
            });
        }

        let token = self.fresh_token(&tables)?;
        let now = self.clock.now();
        tables.last_id += 1;
        let id = BookingId(tables.last_id);
        let booking = Booking {
            id,
            token: token.clone(),
            requester_id: draft.requester_id,
            location: draft.location,
            date: draft.date,
            time: draft.time,
            description: draft.description,
            state: BookingState::Received,
            created_at: now,
            updated_at: now,
        };

        tables.slots.insert(slot.clone(), id);
        tables.tokens.insert(token.clone(), id);
        tables.bookings.insert(id, booking.clone());

        if let Err(err) = self.persist(&tables).await {
            tables.slots.remove(&slot);
            tables.tokens.remove(&token);
            tables.bookings.remove(&id);
            return Err(err);
        }

        debug!(booking_id = %id, slot = %slot, "Slot reserved");
        Ok(booking)
    }

    async fn get(&self, id: BookingId) -> Result<Booking, BookingError> {
        self.tables.read().await.find(id).cloned()
    }

    async fn get_by_token(&self, token: &BookingToken) -> Result<Booking, BookingError> {
        let tables = self.tables.read().await;
        tables
            .tokens
            .get(token)
            .and_then(|id| tables.bookings.get(id))
            .cloned()
            .ok_or_else(|| BookingError::NotFound("booking".to_owned()))
    }

    async fn list_by_requester(
        &self,
        requester: &PrincipalId,
    ) -> Result<Vec<Booking>, BookingError> {
        let tables = self.tables.read().await;
        Ok(tables
            .bookings
            .values()
            .filter(|booking| &booking.requester_id == requester)
            .cloned()
            .collect())
    }

    async fn list_by_filter(&self, filter: &BookingFilter) -> Result<Vec<Booking>, BookingError> {
        let tables = self.tables.read().await;
        Ok(tables
            .bookings
            .values()
            .filter(|booking| filter.matches(booking))
            .cloned()
            .collect())
    }

    async fn held_slots(
        &self,
        municipality: &str,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, BookingError> {
        let tables = self.tables.read().await;
        let mut held: Vec<NaiveTime> = tables
            .active_on(municipality, date)
            .map(|slot| slot.time)
            .collect();
        held.sort_unstable();
        Ok(held)
    }

    async fn apply_transition(&self, transition: Transition) -> Result<Booking, BookingError> {
        let Transition {
            booking_id,
            expected,
            target,
            changed_by,
        } = transition;
        let mut tables = self.tables.write().await;

        let previous = tables.find(booking_id)?.clone();
        if previous.state != expected {
            return Err(BookingError::InvalidTransition {
                from: previous.state,
                to: target,
            });
        }
        ensure_edge(previous.state, target)?;

        let now = self.clock.now();
        let mut updated = previous.clone();
        updated.state = target;
        updated.updated_at = now;

        let slot = previous.slot_key();
        let released = !updated.is_active() && tables.slots.get(&slot) == Some(&booking_id);
        if released {
            tables.slots.remove(&slot);
        }
        tables.bookings.insert(booking_id, updated.clone());
        tables
            .history
            .entry(booking_id)
            .or_default()
            .push(StateChangeRecord {
                booking_id,
                from_state: previous.state,
                to_state: target,
                changed_by,
                timestamp: now,
            });

        if let Err(err) = self.persist(&tables).await {
            if released {
                tables.slots.insert(slot, booking_id);
            }
            tables.bookings.insert(booking_id, previous);
            if let Some(trail) = tables.history.get_mut(&booking_id) {
                trail.pop();
            }
            return Err(err);
        }

        debug!(
            booking_id = %booking_id,
            from = %expected,
            to = %target,
            released,
            "Transition committed"
        );
        Ok(updated)
    }

    async fn history(&self, id: BookingId) -> Result<Vec<StateChangeRecord>, BookingError> {
        let tables = self.tables.read().await;
        tables.find(id)?;
        Ok(tables.history.get(&id).cloned().unwrap_or_default())
    }
}
