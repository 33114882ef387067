use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::reclaim::{close_pending, reclaim_stale, Closed};
use super::MAX_CAS_ATTEMPTS;
use crate::clock::{truncate, Clock};
use crate::config::ReservationConfig;
use crate::error::{ReservationError, ReservationResult};
use crate::inventory::SeatInventory;
use crate::models::{
    Booking, BookingState, BookingStatus, LockHandle, SeatId, SeatLock, SeatStatus, ShowId,
    ShowSeatState, ShowStatus,
};

/// Takes, extends and gives back time-boxed holds on groups of seats.
#[derive(Clone)]
pub struct LockManager {
    inventory: Arc<dyn SeatInventory>,
    clock: Arc<dyn Clock>,
    config: ReservationConfig,
}

impl LockManager {
    pub fn new(
        inventory: Arc<dyn SeatInventory>,
        clock: Arc<dyn Clock>,
        config: ReservationConfig,
    ) -> Self {
        Self {
            inventory,
            clock,
            config,
        }
    }

    /// Locks every requested seat for `holder`, or none of them.
    ///
    /// Seats are taken in ascending id order. `hold` defaults to the configured hold
    /// duration and may not exceed it.
    pub async fn acquire_lock(
        &self,
        show_id: ShowId,
        seat_ids: &[SeatId],
        holder: &str,
        hold: Option<Duration>,
    ) -> ReservationResult<LockHandle> {
        let seat_ids = self.validate_request(seat_ids, holder)?;
        let hold = self.resolve_hold(hold)?;

        let show = self.inventory.get_show(show_id).await?;
        if show.status == ShowStatus::Cancelled {
            return Err(ReservationError::InvalidRequest(format!(
                "show {} is cancelled",
                show_id
            )));
        }

        let states = self
            .inventory
            .get_states(show_id, &seat_ids)
            .await
            .map_err(|e| match e {
                ReservationError::NotFound(what) => {
                    ReservationError::InvalidRequest(format!("{} is not part of show {}", what, show_id))
                }
                other => other,
            })?;

        let now = self.clock.now();
        let taken = unavailable(&states, now);
        if !taken.is_empty() {
            debug!("Seats {:?} of show {} are taken, nothing locked", taken, show_id);
            return Err(ReservationError::SeatUnavailable { seats: taken });
        }

        let lock = SeatLock {
            holder: holder.to_string(),
            booking_id: Uuid::new_v4(),
            expires_at: truncate(now + chrono_duration(hold)?),
        };

        let mut locked: Vec<SeatId> = Vec::with_capacity(states.len());
        for state in states {
            let seat_id = state.seat_id;
            if let Err(e) = self.lock_seat(state, &lock, now).await {
                self.rollback(show_id, &locked, &lock).await;
                return Err(self.explain_failure(show_id, &seat_ids, e, now).await);
            }
            locked.push(seat_id);
        }

        let booking = Booking::pending(
            lock.booking_id,
            lock.holder.clone(),
            show_id,
            seat_ids,
            now,
            lock.expires_at,
        );
        if let Err(e) = self.inventory.insert_booking(&booking).await {
            warn!("Failed to record booking {}: {}", booking.id, e);
            self.rollback(show_id, &booking.seat_ids, &lock).await;
            return Err(e);
        }

        info!(
            "🔒 {} locked seats {:?} of show {} until {} ({})",
            booking.holder, booking.seat_ids, show_id, booking.lock_expires_at, booking.reference
        );
        Ok(booking.lock_handle())
    }

    /// Pushes the hold of a pending booking `extension` further out.
    pub async fn renew_lock(
        &self,
        booking_id: Uuid,
        extension: Duration,
    ) -> ReservationResult<Booking> {
        if extension.is_zero() || extension > self.config.max_hold_extension() {
            return Err(ReservationError::InvalidRequest(format!(
                "extension must be between 1 and {} seconds",
                self.config.max_hold_extension_secs
            )));
        }
        let extension = chrono_duration(extension)?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let booking = self.inventory.get_booking(booking_id).await?;
            match booking.status {
                BookingStatus::Pending => {}
                BookingStatus::Expired => return Err(ReservationError::LockExpired(booking_id)),
                status => {
                    return Err(ReservationError::AlreadyFinalized { booking_id, status });
                }
            }

            let now = self.clock.now();
            if booking.is_lock_expired(now) {
                return Err(ReservationError::LockExpired(booking_id));
            }

            let renewed_until = truncate(booking.lock_expires_at + extension);
            let next = BookingState {
                status: BookingStatus::Pending,
                lock_expires_at: renewed_until,
            };
            let renewed = match self
                .inventory
                .transition_booking(booking_id, &booking.state(), next, now)
                .await
            {
                Ok(renewed) => renewed,
                Err(ReservationError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            };

            for seat_id in &renewed.seat_ids {
                self.extend_seat(&renewed, *seat_id).await?;
            }

            info!("🔒 Lock {} renewed until {}", renewed.reference, renewed_until);
            return Ok(renewed);
        }

        Err(ReservationError::Conflict(format!(
            "booking {} kept changing while renewing it",
            booking_id
        )))
    }

    /// Gives the seats of a pending booking back. Releasing a booking that is
    /// already terminal is a no-op.
    pub async fn release_lock(&self, booking_id: Uuid) -> ReservationResult<()> {
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
                info!("🔓 Lock {} released", booking.reference);
            }
            Closed::Already(booking) => {
                debug!(
                    "Release of booking {} ignored, it is already {}",
                    booking.reference, booking.status
                );
            }
        }
        Ok(())
    }

    fn validate_request(&self, seat_ids: &[SeatId], holder: &str) -> ReservationResult<Vec<SeatId>> {
        if holder.trim().is_empty() {
            return Err(ReservationError::InvalidRequest(
                "holder must not be blank".to_string(),
            ));
        }
        if seat_ids.is_empty() {
            return Err(ReservationError::InvalidRequest(
                "at least one seat is required".to_string(),
            ));
        }
        if seat_ids.len() > self.config.max_seats_per_lock {
            return Err(ReservationError::InvalidRequest(format!(
                "at most {} seats can be locked at once",
                self.config.max_seats_per_lock
            )));
        }

        let mut sorted = seat_ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != seat_ids.len() {
            return Err(ReservationError::InvalidRequest(
                "seat ids must not repeat".to_string(),
            ));
        }
        Ok(sorted)
    }

    fn resolve_hold(&self, hold: Option<Duration>) -> ReservationResult<Duration> {
        let max = self.config.hold_duration();
        let hold = hold.unwrap_or(max);
        if hold.is_zero() || hold > max {
            return Err(ReservationError::InvalidRequest(format!(
                "hold must be between 1 and {} seconds",
                self.config.hold_duration_secs
            )));
        }
        Ok(hold)
    }

    /// AVAILABLE -> LOCKED for one seat, reclaiming a lapsed lock on the way.
    async fn lock_seat(
        &self,
        mut state: ShowSeatState,
        lock: &SeatLock,
        now: DateTime<Utc>,
    ) -> ReservationResult<()> {
        let show_id = state.show_id;
        let seat_id = state.seat_id;
        let taken = || ReservationError::SeatUnavailable {
            seats: vec![seat_id],
        };

        for _ in 0..MAX_CAS_ATTEMPTS {
            match &state.status {
                SeatStatus::Available => {
                    let locked = SeatStatus::Locked(lock.clone());
                    match self
                        .inventory
                        .transition(show_id, seat_id, &SeatStatus::Available, locked)
                        .await
                    {
                        Ok(_) => return Ok(()),
                        Err(ReservationError::Conflict(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                SeatStatus::Locked(held) if held.is_expired(now) => {
                    let outcome = reclaim_stale(self.inventory.as_ref(), &state, now).await?;
                    debug!(
                        "Stale lock on seat {} of show {} reclaimed: {:?}",
                        seat_id, show_id, outcome
                    );
                }
                _ => return Err(taken()),
            }
            state = self.reread(show_id, seat_id).await?;
        }

        Err(taken())
    }

    async fn reread(&self, show_id: ShowId, seat_id: SeatId) -> ReservationResult<ShowSeatState> {
        self.inventory
            .get_states(show_id, &[seat_id])
            .await?
            .pop()
            .ok_or_else(|| ReservationError::NotFound(format!("seat {}", seat_id)))
    }

    /// LOCKED -> AVAILABLE for every seat this call managed to lock.
    async fn rollback(&self, show_id: ShowId, seat_ids: &[SeatId], lock: &SeatLock) {
        let ours = SeatStatus::Locked(lock.clone());
        for seat_id in seat_ids {
            if let Err(e) = self
                .inventory
                .transition(show_id, *seat_id, &ours, SeatStatus::Available)
                .await
            {
                // Left locked; the sweeper frees it once the lock lapses.
                warn!(
                    "Rollback of seat {} of show {} for booking {} failed: {}",
                    seat_id, show_id, lock.booking_id, e
                );
            }
        }
    }

    /// Widens a single-seat `SeatUnavailable` to every requested seat that is taken now.
    async fn explain_failure(
        &self,
        show_id: ShowId,
        seat_ids: &[SeatId],
        error: ReservationError,
        now: DateTime<Utc>,
    ) -> ReservationError {
        let ReservationError::SeatUnavailable { seats: failed } = error else {
            return error;
        };

        let mut seats = match self.inventory.get_states(show_id, seat_ids).await {
            Ok(states) => unavailable(&states, now),
            Err(_) => Vec::new(),
        };
        seats.extend(failed);
        seats.sort_unstable();
        seats.dedup();
        ReservationError::SeatUnavailable { seats }
    }

    async fn extend_seat(&self, booking: &Booking, seat_id: SeatId) -> ReservationResult<()> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let state = self.reread(booking.show_id, seat_id).await?;
            let lock = match &state.status {
                SeatStatus::Locked(lock) if lock.booking_id == booking.id => lock,
                _ => {
                    warn!(
                        "Seat {} is no longer held by booking {} during renew",
                        seat_id, booking.reference
                    );
                    return Ok(());
                }
            };
            if lock.expires_at == booking.lock_expires_at {
                return Ok(());
            }

            let extended = SeatStatus::Locked(SeatLock {
                expires_at: booking.lock_expires_at,
                ..lock.clone()
            });
            match self
                .inventory
                .transition(booking.show_id, seat_id, &state.status, extended)
                .await
            {
                Ok(_) => return Ok(()),
                Err(ReservationError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(ReservationError::Conflict(format!(
            "seat {} kept changing while renewing booking {}",
            seat_id, booking.id
        )))
    }
}

/// Requested seats a new lock could not take at `now`.
fn unavailable(states: &[ShowSeatState], now: DateTime<Utc>) -> Vec<SeatId> {
    states
        .iter()
        .filter(|s| !s.status.is_acquirable(now))
        .map(|s| s.seat_id)
        .collect()
}

fn chrono_duration(duration: Duration) -> ReservationResult<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|_| ReservationError::InvalidRequest("duration is out of range".to_string()))
}
