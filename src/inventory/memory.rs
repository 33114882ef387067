use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{describe_seat, ExpiredLockCursor, LockStats, SeatInventory};
use crate::error::{ReservationError, ReservationResult};
use crate::models::{
    Booking, BookingState, BookingStatus, Seat, SeatId, SeatStatus, Show, ShowId, ShowSeatState,
    ShowStatus,
};

/// Process-local inventory backed by `DashMap`.
///
/// Each conditional transition runs while holding the shard lock of its key, which
/// gives the same per-seat and per-booking linearizability as a row-level
/// conditional `UPDATE`.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    shows: DashMap<ShowId, Show>,
    show_seats: DashMap<ShowId, Vec<SeatId>>,
    seats: DashMap<(ShowId, SeatId), SeatStatus>,
    bookings: DashMap<Uuid, Booking>,
    references: DashMap<String, Uuid>,
}

/// Serializable image of everything the inventory persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub shows: Vec<Show>,
    pub seats: Vec<ShowSeatState>,
    pub bookings: Vec<Booking>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministically ordered copy of the stored state.
    pub fn snapshot(&self) -> InventorySnapshot {
        let mut shows: Vec<Show> = self.shows.iter().map(|s| s.value().clone()).collect();
        shows.sort_by_key(|s| s.id);

        let mut seats: Vec<ShowSeatState> = self
            .seats
            .iter()
            .map(|entry| {
                let (show_id, seat_id) = *entry.key();
                ShowSeatState {
                    show_id,
                    seat_id,
                    status: entry.value().clone(),
                }
            })
            .collect();
        seats.sort_by_key(|s| (s.show_id, s.seat_id));

        let mut bookings: Vec<Booking> = self.bookings.iter().map(|b| b.value().clone()).collect();
        bookings.sort_by_key(|b| (b.created_at, b.id));

        InventorySnapshot {
            shows,
            seats,
            bookings,
        }
    }

    /// Rebuilds an inventory from a snapshot, as a restarted process would from storage.
    pub fn from_snapshot(snapshot: InventorySnapshot) -> Self {
        let inventory = Self::new();
        for show in snapshot.shows {
            inventory.show_seats.entry(show.id).or_default();
            inventory.shows.insert(show.id, show);
        }
        for state in snapshot.seats {
            inventory
                .show_seats
                .entry(state.show_id)
                .or_default()
                .push(state.seat_id);
            inventory
                .seats
                .insert((state.show_id, state.seat_id), state.status);
        }
        for mut ids in inventory.show_seats.iter_mut() {
            ids.value_mut().sort_unstable();
        }
        for booking in snapshot.bookings {
            inventory
                .references
                .insert(booking.reference.clone(), booking.id);
            inventory.bookings.insert(booking.id, booking);
        }
        inventory
    }

    fn ensure_show(&self, show_id: ShowId) -> ReservationResult<()> {
        if self.shows.contains_key(&show_id) {
            Ok(())
        } else {
            Err(ReservationError::NotFound(format!("show {}", show_id)))
        }
    }
}

#[async_trait]
impl SeatInventory for MemoryInventory {
    async fn register_show(&self, show: &Show, seats: &[Seat]) -> ReservationResult<()> {
        if let Some(foreign) = seats.iter().find(|s| s.screen_id != show.screen_id) {
            return Err(ReservationError::InvalidRequest(format!(
                "seat {} belongs to screen {}, not {}",
                foreign.id, foreign.screen_id, show.screen_id
            )));
        }

        match self.shows.entry(show.id) {
            Entry::Occupied(_) => Err(ReservationError::InvalidRequest(format!(
                "show {} is already registered",
                show.id
            ))),
            Entry::Vacant(slot) => {
                let mut ids: Vec<SeatId> = seats
                    .iter()
                    .filter(|s| s.is_active)
                    .map(|s| s.id)
                    .collect();
                ids.sort_unstable();
                ids.dedup();
                for seat_id in &ids {
                    self.seats.insert((show.id, *seat_id), SeatStatus::Available);
                }
                self.show_seats.insert(show.id, ids);
                slot.insert(show.clone());
                Ok(())
            }
        }
    }

    async fn get_show(&self, show_id: ShowId) -> ReservationResult<Show> {
        self.shows
            .get(&show_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| ReservationError::NotFound(format!("show {}", show_id)))
    }

    async fn set_show_status(
        &self,
        show_id: ShowId,
        expected: ShowStatus,
        new: ShowStatus,
    ) -> ReservationResult<Show> {
        let mut show = self
            .shows
            .get_mut(&show_id)
            .ok_or_else(|| ReservationError::NotFound(format!("show {}", show_id)))?;
        if show.status != expected {
            return Err(ReservationError::Conflict(format!(
                "show {} is {}, expected {}",
                show_id,
                show.status.as_str(),
                expected.as_str()
            )));
        }
        show.status = new;
        Ok(show.clone())
    }

    async fn get_states(
        &self,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> ReservationResult<Vec<ShowSeatState>> {
        self.ensure_show(show_id)?;
        seat_ids
            .iter()
            .map(|seat_id| {
                self.seats
                    .get(&(show_id, *seat_id))
                    .map(|status| ShowSeatState {
                        show_id,
                        seat_id: *seat_id,
                        status: status.value().clone(),
                    })
                    .ok_or_else(|| ReservationError::NotFound(describe_seat(show_id, *seat_id)))
            })
            .collect()
    }

    async fn list_seats(&self, show_id: ShowId) -> ReservationResult<Vec<ShowSeatState>> {
        let ids = self
            .show_seats
            .get(&show_id)
            .map(|ids| ids.value().clone())
            .ok_or_else(|| ReservationError::NotFound(format!("show {}", show_id)))?;
        self.get_states(show_id, &ids).await
    }

    async fn transition(
        &self,
        show_id: ShowId,
        seat_id: SeatId,
        expected: &SeatStatus,
        new: SeatStatus,
    ) -> ReservationResult<ShowSeatState> {
        self.ensure_show(show_id)?;
        let mut current = self
            .seats
            .get_mut(&(show_id, seat_id))
            .ok_or_else(|| ReservationError::NotFound(describe_seat(show_id, seat_id)))?;

        if *current != *expected {
            return Err(ReservationError::Conflict(format!(
                "{} is {}, expected {}",
                describe_seat(show_id, seat_id),
                current.label(),
                expected.label()
            )));
        }

        *current = new.clone();
        Ok(ShowSeatState {
            show_id,
            seat_id,
            status: new,
        })
    }

    async fn find_expired_locks(
        &self,
        now: DateTime<Utc>,
        after: Option<ExpiredLockCursor>,
        limit: usize,
    ) -> ReservationResult<Vec<ShowSeatState>> {
        let mut expired: Vec<(ExpiredLockCursor, ShowSeatState)> = self
            .seats
            .iter()
            .filter(|entry| matches!(entry.value(), SeatStatus::Locked(lock) if lock.is_expired(now)))
            .filter_map(|entry| {
                let (show_id, seat_id) = *entry.key();
                let state = ShowSeatState {
                    show_id,
                    seat_id,
                    status: entry.value().clone(),
                };
                ExpiredLockCursor::at(&state).map(|cursor| (cursor, state))
            })
            .filter(|(cursor, _)| after.map_or(true, |after| *cursor > after))
            .collect();

        expired.sort_by_key(|(cursor, _)| *cursor);
        expired.truncate(limit);
        Ok(expired.into_iter().map(|(_, state)| state).collect())
    }

    async fn lock_stats(&self, now: DateTime<Utc>) -> ReservationResult<LockStats> {
        let mut stats = LockStats::default();
        for entry in self.seats.iter() {
            if let SeatStatus::Locked(lock) = entry.value() {
                stats.locked += 1;
                if lock.is_expired(now) {
                    stats.expired_pending += 1;
                }
            }
        }
        Ok(stats)
    }

    async fn insert_booking(&self, booking: &Booking) -> ReservationResult<()> {
        match self.bookings.entry(booking.id) {
            Entry::Occupied(_) => Err(ReservationError::Conflict(format!(
                "booking {} already exists",
                booking.id
            ))),
            Entry::Vacant(slot) => match self.references.entry(booking.reference.clone()) {
                Entry::Occupied(_) => Err(ReservationError::Conflict(format!(
                    "booking reference {} already exists",
                    booking.reference
                ))),
                Entry::Vacant(reference) => {
                    reference.insert(booking.id);
                    slot.insert(booking.clone());
                    Ok(())
                }
            },
        }
    }

    async fn get_booking(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        self.bookings
            .get(&booking_id)
            .map(|b| b.value().clone())
            .ok_or_else(|| ReservationError::booking_not_found(booking_id))
    }

    async fn find_booking_by_reference(&self, reference: &str) -> ReservationResult<Booking> {
        let booking_id = self
            .references
            .get(reference)
            .map(|id| *id.value())
            .ok_or_else(|| ReservationError::NotFound(format!("booking reference {}", reference)))?;
        self.get_booking(booking_id).await
    }

    async fn list_bookings_for_holder(
        &self,
        holder: &str,
        status: Option<BookingStatus>,
    ) -> ReservationResult<Vec<Booking>> {
        let mut found: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| b.holder == holder && status.map_or(true, |s| b.status == s))
            .map(|b| b.value().clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }

    async fn transition_booking(
        &self,
        booking_id: Uuid,
        expected: &BookingState,
        new: BookingState,
        now: DateTime<Utc>,
    ) -> ReservationResult<Booking> {
        let mut booking = self
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| ReservationError::booking_not_found(booking_id))?;

        if booking.state() != *expected {
            return Err(ReservationError::Conflict(format!(
                "booking {} is {} until {}, expected {} until {}",
                booking_id,
                booking.status,
                booking.lock_expires_at,
                expected.status,
                expected.lock_expires_at
            )));
        }

        booking.status = new.status;
        booking.lock_expires_at = new.lock_expires_at;
        booking.updated_at = now;
        Ok(booking.clone())
    }
}
