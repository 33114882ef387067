//! Seat inventory: the single shared, persisted source of reservation state.
//!
//! Every seat and booking mutation goes through a conditional transition that
//! succeeds only when the stored value still equals what the caller last saw.
//! Correctness therefore holds across processes sharing the same storage, not
//! only across threads of one process.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ReservationResult;
use crate::models::{
    Booking, BookingState, BookingStatus, Seat, SeatId, SeatStatus, Show, ShowId, ShowSeatState,
    ShowStatus,
};

pub use memory::{InventorySnapshot, MemoryInventory};
pub use postgres::PgInventory;

#[async_trait]
pub trait SeatInventory: Send + Sync {
    /// Creates the show and one `Available` state per active seat.
    async fn register_show(&self, show: &Show, seats: &[Seat]) -> ReservationResult<()>;

    async fn get_show(&self, show_id: ShowId) -> ReservationResult<Show>;

    /// Conditional show status update; `Conflict` when the status is no longer `expected`.
    async fn set_show_status(
        &self,
        show_id: ShowId,
        expected: ShowStatus,
        new: ShowStatus,
    ) -> ReservationResult<Show>;

    /// Current state of each requested seat, in request order.
    ///
    /// Fails with `NotFound` if the show or any of the seats is unknown to it.
    async fn get_states(
        &self,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> ReservationResult<Vec<ShowSeatState>>;

    /// Every seat state of a show, ordered by seat id.
    async fn list_seats(&self, show_id: ShowId) -> ReservationResult<Vec<ShowSeatState>>;

    /// Compare-and-set on one seat.
    ///
    /// Succeeds only if the stored status equals `expected` in full (a `Locked`
    /// expectation includes holder, booking and expiry). Otherwise `Conflict`.
    async fn transition(
        &self,
        show_id: ShowId,
        seat_id: SeatId,
        expected: &SeatStatus,
        new: SeatStatus,
    ) -> ReservationResult<ShowSeatState>;

    /// Locked seats whose expiry is strictly before `now`, ordered by
    /// `(expires_at, show_id, seat_id)` and starting strictly after `after`.
    async fn find_expired_locks(
        &self,
        now: DateTime<Utc>,
        after: Option<ExpiredLockCursor>,
        limit: usize,
    ) -> ReservationResult<Vec<ShowSeatState>>;

    /// Counts of currently locked seats and of those whose lock already lapsed.
    async fn lock_stats(&self, now: DateTime<Utc>) -> ReservationResult<LockStats>;

    async fn insert_booking(&self, booking: &Booking) -> ReservationResult<()>;

    async fn get_booking(&self, booking_id: Uuid) -> ReservationResult<Booking>;

    async fn find_booking_by_reference(&self, reference: &str) -> ReservationResult<Booking>;

    /// Bookings of one holder, newest first.
    async fn list_bookings_for_holder(
        &self,
        holder: &str,
        status: Option<BookingStatus>,
    ) -> ReservationResult<Vec<Booking>>;

    /// Compare-and-set on a booking's status and lock expiry.
    async fn transition_booking(
        &self,
        booking_id: Uuid,
        expected: &BookingState,
        new: BookingState,
        now: DateTime<Utc>,
    ) -> ReservationResult<Booking>;
}

/// Position in the expired-lock ordering, used to page past rows already handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpiredLockCursor {
    pub expires_at: DateTime<Utc>,
    pub show_id: ShowId,
    pub seat_id: SeatId,
}

impl ExpiredLockCursor {
    /// Cursor at a locked seat; `None` for any other status.
    pub fn at(state: &ShowSeatState) -> Option<Self> {
        state.status.lock().map(|lock| ExpiredLockCursor {
            expires_at: lock.expires_at,
            show_id: state.show_id,
            seat_id: state.seat_id,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    pub locked: u64,
    pub expired_pending: u64,
}

pub(crate) fn describe_seat(show_id: ShowId, seat_id: SeatId) -> String {
    format!("seat {} of show {}", seat_id, show_id)
}
