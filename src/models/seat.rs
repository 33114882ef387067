use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SeatId, ShowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatCategory {
    Standard,
    Premium,
    Vip,
    Recliner,
}

impl SeatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatCategory::Standard => "STANDARD",
            SeatCategory::Premium => "PREMIUM",
            SeatCategory::Vip => "VIP",
            SeatCategory::Recliner => "RECLINER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "STANDARD" => Some(SeatCategory::Standard),
            "PREMIUM" => Some(SeatCategory::Premium),
            "VIP" => Some(SeatCategory::Vip),
            "RECLINER" => Some(SeatCategory::Recliner),
            _ => None,
        }
    }
}

/// Physical seat of a screen. Shared by every show on that screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub id: SeatId,
    pub screen_id: i64,
    pub row: String,
    pub number: i32,
    pub category: SeatCategory,
    pub is_active: bool,
}

/// Time-boxed hold on one seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLock {
    pub holder: String,
    pub booking_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl SeatLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Reservation state of a seat for one show.
///
/// Lock holder and expiry only exist inside `Locked`, so a booked seat can never
/// carry a dangling expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Locked(SeatLock),
    Booked { booking_id: Uuid },
}

impl SeatStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Locked(_) => "LOCKED",
            SeatStatus::Booked { .. } => "BOOKED",
        }
    }

    pub fn lock(&self) -> Option<&SeatLock> {
        match self {
            SeatStatus::Locked(lock) => Some(lock),
            _ => None,
        }
    }

    pub fn is_locked_by(&self, booking_id: Uuid) -> bool {
        matches!(self, SeatStatus::Locked(lock) if lock.booking_id == booking_id)
    }

    /// Whether a new lock could take this seat at `now`: free, or held by a lock that already lapsed.
    pub fn is_acquirable(&self, now: DateTime<Utc>) -> bool {
        match self {
            SeatStatus::Available => true,
            SeatStatus::Locked(lock) => lock.is_expired(now),
            SeatStatus::Booked { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowSeatState {
    pub show_id: ShowId,
    pub seat_id: SeatId,
    #[serde(flatten)]
    pub status: SeatStatus,
}
