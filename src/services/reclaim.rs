//! Seat and booking clean-up steps shared by the lock manager, the finalizer and the
//! sweeper. Every step is a conditional transition; losing a race to another actor
//! is never an error here, the winner already moved the state forward.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::MAX_CAS_ATTEMPTS;
use crate::error::{ReservationError, ReservationResult};
use crate::inventory::SeatInventory;
use crate::models::{Booking, BookingState, BookingStatus, SeatId, SeatStatus, ShowSeatState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// The seat went back to `Available`.
    Released,
    /// The owning booking was confirmed; the seat was moved on to `Booked`.
    RolledForward,
    /// The owning booking was expired and this many of its seats released.
    Expired { released: usize },
    /// Someone else already moved the seat, or the booking was renewed.
    Skipped,
}

/// How `close_pending` found the booking.
#[derive(Debug, Clone)]
pub(crate) enum Closed {
    Now(Booking),
    Already(Booking),
}

/// Reclaims one lapsed seat lock according to the state of the booking that owns it.
pub async fn reclaim_stale(
    inventory: &dyn SeatInventory,
    state: &ShowSeatState,
    now: DateTime<Utc>,
) -> ReservationResult<ReclaimOutcome> {
    let lock = match state.status.lock() {
        Some(lock) if lock.is_expired(now) => lock,
        _ => return Ok(ReclaimOutcome::Skipped),
    };

    let booking = match inventory.get_booking(lock.booking_id).await {
        Ok(booking) => booking,
        Err(ReservationError::NotFound(_)) => {
            // Locked but the booking was never written: the acquiring caller died midway.
            debug!(
                "Lock on seat {} of show {} has no booking {}",
                state.seat_id, state.show_id, lock.booking_id
            );
            return swap_seat(inventory, state, SeatStatus::Available, ReclaimOutcome::Released)
                .await;
        }
        Err(e) => return Err(e),
    };

    match booking.status {
        BookingStatus::Pending if booking.is_lock_expired(now) => {
            match expire_booking(inventory, &booking, now).await {
                Ok(expired) => {
                    let released = release_seats(inventory, &expired).await?;
                    info!(
                        "⏰ Booking {} expired, {} seats released",
                        expired.reference, released
                    );
                    Ok(ReclaimOutcome::Expired { released })
                }
                Err(ReservationError::Conflict(_)) => Ok(ReclaimOutcome::Skipped),
                Err(e) => Err(e),
            }
        }
        BookingStatus::Pending => Ok(ReclaimOutcome::Skipped),
        BookingStatus::Confirmed => {
            swap_seat(
                inventory,
                state,
                SeatStatus::Booked {
                    booking_id: booking.id,
                },
                ReclaimOutcome::RolledForward,
            )
            .await
        }
        BookingStatus::Cancelled | BookingStatus::Expired => {
            swap_seat(inventory, state, SeatStatus::Available, ReclaimOutcome::Released).await
        }
    }
}

async fn swap_seat(
    inventory: &dyn SeatInventory,
    state: &ShowSeatState,
    new: SeatStatus,
    outcome: ReclaimOutcome,
) -> ReservationResult<ReclaimOutcome> {
    match inventory
        .transition(state.show_id, state.seat_id, &state.status, new)
        .await
    {
        Ok(_) => Ok(outcome),
        Err(ReservationError::Conflict(_)) => Ok(ReclaimOutcome::Skipped),
        Err(e) => Err(e),
    }
}

/// PENDING -> EXPIRED, conditional on the booking being exactly as read.
pub(crate) async fn expire_booking(
    inventory: &dyn SeatInventory,
    booking: &Booking,
    now: DateTime<Utc>,
) -> ReservationResult<Booking> {
    inventory
        .transition_booking(
            booking.id,
            &booking.state(),
            BookingState {
                status: BookingStatus::Expired,
                lock_expires_at: booking.lock_expires_at,
            },
            now,
        )
        .await
}

/// Moves a pending booking to `target` (cancelled or expired) and frees its seats.
///
/// Returns `Closed::Already` with the current record when the booking is terminal.
pub(crate) async fn close_pending(
    inventory: &dyn SeatInventory,
    booking_id: Uuid,
    target: BookingStatus,
    now: DateTime<Utc>,
) -> ReservationResult<Closed> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let booking = inventory.get_booking(booking_id).await?;
        if booking.status.is_terminal() {
            return Ok(Closed::Already(booking));
        }

        let next = BookingState {
            status: target,
            lock_expires_at: booking.lock_expires_at,
        };
        match inventory
            .transition_booking(booking_id, &booking.state(), next, now)
            .await
        {
            Ok(closed) => {
                release_seats(inventory, &closed).await?;
                return Ok(Closed::Now(closed));
            }
            Err(ReservationError::Conflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(ReservationError::Conflict(format!(
        "booking {} kept changing while closing it",
        booking_id
    )))
}

/// Frees every seat still locked by `booking`. Returns how many were freed.
pub(crate) async fn release_seats(
    inventory: &dyn SeatInventory,
    booking: &Booking,
) -> ReservationResult<usize> {
    let mut released = 0;
    for seat_id in &booking.seat_ids {
        if release_seat(inventory, booking, *seat_id).await? {
            released += 1;
        }
    }
    Ok(released)
}

async fn release_seat(
    inventory: &dyn SeatInventory,
    booking: &Booking,
    seat_id: SeatId,
) -> ReservationResult<bool> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let current = current_status(inventory, booking, seat_id).await?;
        if !current.is_locked_by(booking.id) {
            return Ok(false);
        }
        match inventory
            .transition(booking.show_id, seat_id, &current, SeatStatus::Available)
            .await
        {
            Ok(_) => return Ok(true),
            Err(ReservationError::Conflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(false)
}

/// Moves every seat of a confirmed `booking` from its lock to `Booked`.
pub(crate) async fn book_seats(
    inventory: &dyn SeatInventory,
    booking: &Booking,
) -> ReservationResult<()> {
    for seat_id in &booking.seat_ids {
        book_seat(inventory, booking, *seat_id).await?;
    }
    Ok(())
}

async fn book_seat(
    inventory: &dyn SeatInventory,
    booking: &Booking,
    seat_id: SeatId,
) -> ReservationResult<()> {
    let booked = SeatStatus::Booked {
        booking_id: booking.id,
    };
    for _ in 0..MAX_CAS_ATTEMPTS {
        let current = current_status(inventory, booking, seat_id).await?;
        if current == booked {
            return Ok(());
        }
        if !current.is_locked_by(booking.id) {
            return Err(ReservationError::Corrupted(format!(
                "seat {} of confirmed booking {} is {}",
                seat_id,
                booking.id,
                current.label()
            )));
        }
        match inventory
            .transition(booking.show_id, seat_id, &current, booked.clone())
            .await
        {
            Ok(_) => return Ok(()),
            Err(ReservationError::Conflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(ReservationError::Conflict(format!(
        "seat {} of booking {} kept changing while booking it",
        seat_id, booking.id
    )))
}

async fn current_status(
    inventory: &dyn SeatInventory,
    booking: &Booking,
    seat_id: SeatId,
) -> ReservationResult<SeatStatus> {
    let mut states = inventory.get_states(booking.show_id, &[seat_id]).await?;
    states
        .pop()
        .map(|s| s.status)
        .ok_or_else(|| ReservationError::NotFound(format!("seat {}", seat_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::MemoryInventory;
    use crate::models::{Seat, SeatCategory, SeatLock, Show, ShowStatus};
    use chrono::Duration;

    async fn inventory_with_lock(
        booking: Option<BookingStatus>,
        now: DateTime<Utc>,
    ) -> (MemoryInventory, ShowSeatState, Uuid) {
        let inventory = MemoryInventory::new();
        let show = Show {
            id: 1,
            movie_id: 1,
            screen_id: 1,
            starts_at: now + Duration::hours(3),
            status: ShowStatus::Available,
        };
        let seat = Seat {
            id: 5,
            screen_id: 1,
            row: "C".to_string(),
            number: 5,
            category: SeatCategory::Premium,
            is_active: true,
        };
        inventory.register_show(&show, &[seat]).await.unwrap();

        let booking_id = Uuid::new_v4();
        let expires_at = now - Duration::seconds(5);
        let locked = SeatStatus::Locked(SeatLock {
            holder: "carol".to_string(),
            booking_id,
            expires_at,
        });
        let state = inventory
            .transition(1, 5, &SeatStatus::Available, locked)
            .await
            .unwrap();

        if let Some(status) = booking {
            let mut record = Booking::pending(
                booking_id,
                "carol".to_string(),
                1,
                vec![5],
                now - Duration::minutes(10),
                expires_at,
            );
            record.status = status;
            inventory.insert_booking(&record).await.unwrap();
        }
        (inventory, state, booking_id)
    }

    #[tokio::test]
    async fn orphan_lock_is_released() {
        let now = crate::clock::truncate(Utc::now());
        let (inventory, state, _) = inventory_with_lock(None, now).await;

        let outcome = reclaim_stale(&inventory, &state, now).await.unwrap();
        assert_eq!(outcome, ReclaimOutcome::Released);
        let seats = inventory.list_seats(1).await.unwrap();
        assert_eq!(seats[0].status, SeatStatus::Available);
    }

    #[tokio::test]
    async fn confirmed_booking_rolls_seat_forward() {
        let now = crate::clock::truncate(Utc::now());
        let (inventory, state, booking_id) =
            inventory_with_lock(Some(BookingStatus::Confirmed), now).await;

        let outcome = reclaim_stale(&inventory, &state, now).await.unwrap();
        assert_eq!(outcome, ReclaimOutcome::RolledForward);
        let seats = inventory.list_seats(1).await.unwrap();
        assert_eq!(seats[0].status, SeatStatus::Booked { booking_id });
    }

    #[tokio::test]
    async fn pending_booking_is_expired_with_its_seats() {
        let now = crate::clock::truncate(Utc::now());
        let (inventory, state, booking_id) =
            inventory_with_lock(Some(BookingStatus::Pending), now).await;

        let outcome = reclaim_stale(&inventory, &state, now).await.unwrap();
        assert_eq!(outcome, ReclaimOutcome::Expired { released: 1 });
        let booking = inventory.get_booking(booking_id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Expired);
    }

    #[tokio::test]
    async fn stale_snapshot_is_skipped() {
        let now = crate::clock::truncate(Utc::now());
        let (inventory, state, _) = inventory_with_lock(None, now).await;

        assert_eq!(
            reclaim_stale(&inventory, &state, now).await.unwrap(),
            ReclaimOutcome::Released
        );
        assert_eq!(
            reclaim_stale(&inventory, &state, now).await.unwrap(),
            ReclaimOutcome::Skipped
        );
    }
}
