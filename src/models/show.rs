use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SeatStatus, ShowId, ShowSeatState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShowStatus {
    Available,
    Full,
    Cancelled,
}

impl ShowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShowStatus::Available => "AVAILABLE",
            ShowStatus::Full => "FULL",
            ShowStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AVAILABLE" => Some(ShowStatus::Available),
            "FULL" => Some(ShowStatus::Full),
            "CANCELLED" => Some(ShowStatus::Cancelled),
            _ => None,
        }
    }
}

/// A scheduled screening. Movie and screen are references into the external catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Show {
    pub id: ShowId,
    pub movie_id: i64,
    pub screen_id: i64,
    pub starts_at: DateTime<Utc>,
    pub status: ShowStatus,
}

/// Seat map of one show as served to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatMap {
    pub show_id: ShowId,
    pub status: ShowStatus,
    /// Free seats, including those whose lock has lapsed but was not swept yet.
    pub available: usize,
    pub locked: usize,
    pub booked: usize,
    pub seats: Vec<ShowSeatState>,
}

impl SeatMap {
    pub fn new(show: &Show, seats: Vec<ShowSeatState>, now: DateTime<Utc>) -> Self {
        let mut map = SeatMap {
            show_id: show.id,
            status: show.status,
            available: 0,
            locked: 0,
            booked: 0,
            seats: Vec::new(),
        };
        for seat in &seats {
            match &seat.status {
                SeatStatus::Booked { .. } => map.booked += 1,
                status if status.is_acquirable(now) => map.available += 1,
                _ => map.locked += 1,
            }
        }
        map.seats = seats;
        map
    }
}
