//! Shared fixtures: one show on an in-memory inventory, driven by a manual clock.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;

use seat_reservation::clock::ManualClock;
use seat_reservation::config::ReservationConfig;
use seat_reservation::inventory::{MemoryInventory, SeatInventory};
use seat_reservation::models::{
    Seat, SeatCategory, SeatId, SeatStatus, Show, ShowId, ShowStatus,
};
use seat_reservation::services::ReservationService;

pub const SHOW: ShowId = 7;
pub const SCREEN: i64 = 2;

pub struct Harness {
    pub service: ReservationService,
    pub inventory: Arc<MemoryInventory>,
    pub clock: ManualClock,
}

impl Harness {
    pub async fn new(seat_count: SeatId) -> Self {
        Self::with_config(seat_count, ReservationConfig::default()).await
    }

    pub async fn with_config(seat_count: SeatId, config: ReservationConfig) -> Self {
        let inventory = Arc::new(MemoryInventory::new());
        inventory
            .register_show(&show(), &seats(seat_count))
            .await
            .unwrap();
        Self::build(inventory, start_clock(), config)
    }

    /// Services on top of an existing inventory, as after a restart.
    pub fn over(inventory: Arc<MemoryInventory>, clock: ManualClock) -> Self {
        Self::build(inventory, clock, ReservationConfig::default())
    }

    fn build(inventory: Arc<MemoryInventory>, clock: ManualClock, config: ReservationConfig) -> Self {
        let service = ReservationService::new(inventory.clone(), Arc::new(clock.clone()), config);
        Self {
            service,
            inventory,
            clock,
        }
    }

    pub async fn statuses(&self, seat_ids: &[SeatId]) -> Vec<SeatStatus> {
        self.inventory
            .get_states(SHOW, seat_ids)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.status)
            .collect()
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }
}

pub fn start_clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 14, 18, 0, 0).unwrap())
}

pub fn show() -> Show {
    Show {
        id: SHOW,
        movie_id: 11,
        screen_id: SCREEN,
        starts_at: Utc.with_ymd_and_hms(2025, 3, 14, 21, 0, 0).unwrap(),
        status: ShowStatus::Available,
    }
}

/// Seats 1..=count on row A.
pub fn seats(count: SeatId) -> Vec<Seat> {
    (1..=count)
        .map(|id| Seat {
            id,
            screen_id: SCREEN,
            row: "A".to_string(),
            number: id as i32,
            category: SeatCategory::Standard,
            is_active: true,
        })
        .collect()
}

pub fn is_available(status: &SeatStatus) -> bool {
    *status == SeatStatus::Available
}
