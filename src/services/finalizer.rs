use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::reclaim::{book_seats, close_pending, Closed};
use super::MAX_CAS_ATTEMPTS;
use crate::clock::Clock;
use crate::error::{ReservationError, ReservationResult};
use crate::inventory::SeatInventory;
use crate::models::{Booking, BookingState, BookingStatus, SeatStatus, ShowId, ShowStatus};

/// Turns pending bookings into sold seats, or gives them up.
#[derive(Clone)]
pub struct BookingFinalizer {
    inventory: Arc<dyn SeatInventory>,
    clock: Arc<dyn Clock>,
}

impl BookingFinalizer {
    pub fn new(inventory: Arc<dyn SeatInventory>, clock: Arc<dyn Clock>) -> Self {
        Self { inventory, clock }
    }

    /// Confirms a pending booking whose hold has not lapsed and books its seats.
    ///
    /// A lapsed hold is expired on the spot and reported as `LockExpired`.
    pub async fn confirm(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let booking = self.inventory.get_booking(booking_id).await?;
            match booking.status {
                BookingStatus::Pending => {}
                BookingStatus::Expired => return Err(ReservationError::LockExpired(booking_id)),
                status => return Err(ReservationError::AlreadyFinalized { booking_id, status }),
            }

            let now = self.clock.now();
            if booking.is_lock_expired(now) {
                if let Closed::Now(expired) = close_pending(
                    self.inventory.as_ref(),
                    booking_id,
                    BookingStatus::Expired,
                    now,
                )
                .await?
                {
                    info!("⏰ Booking {} expired before confirmation", expired.reference);
                }
                return Err(ReservationError::LockExpired(booking_id));
            }

            let next = BookingState {
                status: BookingStatus::Confirmed,
                lock_expires_at: booking.lock_expires_at,
            };
            let confirmed = match self
                .inventory
                .transition_booking(booking_id, &booking.state(), next, now)
                .await
            {
                Ok(confirmed) => confirmed,
                Err(ReservationError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            };

            book_seats(self.inventory.as_ref(), &confirmed).await?;
            info!(
                "✅ Booking {} confirmed, seats {:?} of show {} sold",
                confirmed.reference, confirmed.seat_ids, confirmed.show_id
            );

            if let Err(e) = self.mark_full_if_sold_out(confirmed.show_id).await {
                warn!("Failed to update status of show {}: {}", confirmed.show_id, e);
            }
            return Ok(confirmed);
        }

        Err(ReservationError::Conflict(format!(
            "booking {} kept changing while confirming it",
            booking_id
        )))
    }

    /// Cancels a pending booking and frees its seats, even if its hold has lapsed.
    pub async fn cancel(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        let now = self.clock.now();
        match close_pending(
            self.inventory.as_ref(),
            booking_id,
            BookingStatus::Cancelled,
            now,
        )
        .await?
        {
            Closed::Now(booking) => {
                info!("❌ Booking {} cancelled", booking.reference);
                Ok(booking)
            }
            Closed::Already(booking) => Err(ReservationError::AlreadyFinalized {
                booking_id,
                status: booking.status,
            }),
        }
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        self.inventory.get_booking(booking_id).await
    }

    pub async fn find_by_reference(&self, reference: &str) -> ReservationResult<Booking> {
        self.inventory.find_booking_by_reference(reference).await
    }

    pub async fn list_for_holder(
        &self,
        holder: &str,
        status: Option<BookingStatus>,
    ) -> ReservationResult<Vec<Booking>> {
        self.inventory.list_bookings_for_holder(holder, status).await
    }

    async fn mark_full_if_sold_out(&self, show_id: ShowId) -> ReservationResult<()> {
        let seats = self.inventory.list_seats(show_id).await?;
        let open = seats
            .iter()
            .any(|s| !matches!(s.status, SeatStatus::Booked { .. }));
        if open || seats.is_empty() {
            return Ok(());
        }

        match self
            .inventory
            .set_show_status(show_id, ShowStatus::Available, ShowStatus::Full)
            .await
        {
            Ok(_) => {
                info!("🎟️ Show {} is sold out", show_id);
                Ok(())
            }
            Err(ReservationError::Conflict(_)) => {
                debug!("Show {} already left AVAILABLE", show_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
