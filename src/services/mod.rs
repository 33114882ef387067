pub mod finalizer;
pub mod lock_manager;
pub mod reclaim;
pub mod sweeper;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ReservationConfig;
use crate::error::ReservationResult;
use crate::inventory::SeatInventory;
use crate::models::{Booking, BookingStatus, LockHandle, SeatId, SeatMap, ShowId};

pub use finalizer::BookingFinalizer;
pub use lock_manager::LockManager;
pub use reclaim::ReclaimOutcome;
pub use sweeper::{ExpirySweeper, SweepReport};

/// Upper bound on re-reads after losing a conditional update before giving up with `Conflict`.
pub const MAX_CAS_ATTEMPTS: usize = 3;

/// Everything the request layer needs, sharing one inventory and one clock.
#[derive(Clone)]
pub struct ReservationService {
    inventory: Arc<dyn SeatInventory>,
    clock: Arc<dyn Clock>,
    locks: LockManager,
    finalizer: BookingFinalizer,
    sweeper: ExpirySweeper,
}

impl ReservationService {
    pub fn new(
        inventory: Arc<dyn SeatInventory>,
        clock: Arc<dyn Clock>,
        config: ReservationConfig,
    ) -> Self {
        let sweeper = ExpirySweeper::new(inventory.clone(), clock.clone(), config.sweep_batch_size);
        let finalizer = BookingFinalizer::new(inventory.clone(), clock.clone());
        let locks = LockManager::new(inventory.clone(), clock.clone(), config);
        Self {
            inventory,
            clock,
            locks,
            finalizer,
            sweeper,
        }
    }

    pub fn inventory(&self) -> &Arc<dyn SeatInventory> {
        &self.inventory
    }

    pub fn sweeper(&self) -> &ExpirySweeper {
        &self.sweeper
    }

    pub async fn acquire_lock(
        &self,
        show_id: ShowId,
        seat_ids: &[SeatId],
        holder: &str,
        hold: Option<Duration>,
    ) -> ReservationResult<LockHandle> {
        self.locks.acquire_lock(show_id, seat_ids, holder, hold).await
    }

    pub async fn renew_lock(&self, booking_id: Uuid, extension: Duration) -> ReservationResult<Booking> {
        self.locks.renew_lock(booking_id, extension).await
    }

    pub async fn release_lock(&self, booking_id: Uuid) -> ReservationResult<()> {
        self.locks.release_lock(booking_id).await
    }

    pub async fn confirm(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        self.finalizer.confirm(booking_id).await
    }

    pub async fn cancel(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        self.finalizer.cancel(booking_id).await
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        self.finalizer.get_booking(booking_id).await
    }

    pub async fn find_by_reference(&self, reference: &str) -> ReservationResult<Booking> {
        self.finalizer.find_by_reference(reference).await
    }

    pub async fn list_for_holder(
        &self,
        holder: &str,
        status: Option<BookingStatus>,
    ) -> ReservationResult<Vec<Booking>> {
        self.finalizer.list_for_holder(holder, status).await
    }

    pub async fn seat_map(&self, show_id: ShowId) -> ReservationResult<SeatMap> {
        let show = self.inventory.get_show(show_id).await?;
        let seats = self.inventory.list_seats(show_id).await?;
        Ok(SeatMap::new(&show, seats, self.clock.now()))
    }
}
