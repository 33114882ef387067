use chrono::{Duration, Utc};
use tracing::info;

use crate::error::{ReservationError, ReservationResult};
use crate::inventory::SeatInventory;
use crate::models::{Seat, SeatCategory, Show, ShowId, ShowStatus};

pub const DEMO_SHOW_ID: ShowId = 1;
const DEMO_SCREEN_ID: i64 = 1;
const ROWS: &[&str] = &["A", "B", "C", "D", "E", "F", "G", "H"];
const SEATS_PER_ROW: i32 = 12;

/// Demo screen: eight rows of twelve, last two rows premium, back corners recliners.
pub fn demo_catalog() -> (Show, Vec<Seat>) {
    let show = Show {
        id: DEMO_SHOW_ID,
        movie_id: 1,
        screen_id: DEMO_SCREEN_ID,
        starts_at: crate::clock::truncate(Utc::now() + Duration::days(1)),
        status: ShowStatus::Available,
    };

    let mut seats = Vec::with_capacity(ROWS.len() * SEATS_PER_ROW as usize);
    for (row_idx, row) in ROWS.iter().enumerate() {
        for number in 1..=SEATS_PER_ROW {
            let back_row = row_idx + 2 >= ROWS.len();
            let category = match (back_row, number) {
                (true, 1) | (true, SEATS_PER_ROW) => SeatCategory::Recliner,
                (true, _) => SeatCategory::Premium,
                _ => SeatCategory::Standard,
            };
            seats.push(Seat {
                id: row_idx as i64 * SEATS_PER_ROW as i64 + number as i64,
                screen_id: DEMO_SCREEN_ID,
                row: row.to_string(),
                number,
                category,
                is_active: true,
            });
        }
    }
    (show, seats)
}

/// Registers the demo show unless it is already there.
pub async fn seed_demo(inventory: &dyn SeatInventory) -> ReservationResult<()> {
    let (show, seats) = demo_catalog();
    match inventory.register_show(&show, &seats).await {
        Ok(()) => {
            info!("🌱 Demo show {} seeded with {} seats", show.id, seats.len());
            Ok(())
        }
        Err(ReservationError::InvalidRequest(_)) => {
            info!("🌱 Demo show {} already present", show.id);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
