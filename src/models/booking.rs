use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{SeatId, ShowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(BookingStatus::Pending),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "EXPIRED" => Some(BookingStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of a booking that conditional updates compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingState {
    pub status: BookingStatus,
    pub lock_expires_at: DateTime<Utc>,
}

/// A purchase attempt. While `Pending` it stands for an active seat lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub reference: String,
    pub holder: String,
    pub show_id: ShowId,
    pub seat_ids: Vec<SeatId>,
    pub status: BookingStatus,
    pub lock_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn pending(
        id: Uuid,
        holder: String,
        show_id: ShowId,
        seat_ids: Vec<SeatId>,
        now: DateTime<Utc>,
        lock_expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            reference: reference_code(id),
            holder,
            show_id,
            seat_ids,
            status: BookingStatus::Pending,
            lock_expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> BookingState {
        BookingState {
            status: self.status,
            lock_expires_at: self.lock_expires_at,
        }
    }

    /// The hold covers instants strictly before `lock_expires_at`; confirm and renew
    /// both refuse from that instant on.
    pub fn is_lock_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.lock_expires_at
    }

    pub fn lock_handle(&self) -> LockHandle {
        LockHandle {
            booking_id: self.id,
            reference: self.reference.clone(),
            show_id: self.show_id,
            seat_ids: self.seat_ids.clone(),
            holder: self.holder.clone(),
            lock_expires_at: self.lock_expires_at,
        }
    }
}

/// Short human-facing booking code, e.g. `BMS-3F2A9C1D`.
pub fn reference_code(id: Uuid) -> String {
    let simple = id.simple().to_string().to_uppercase();
    format!("BMS-{}", &simple[..8])
}

/// What a successful lock acquisition hands back to the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    pub booking_id: Uuid,
    pub reference: String,
    pub show_id: ShowId,
    pub seat_ids: Vec<SeatId>,
    pub holder: String,
    pub lock_expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_code_is_stable_for_id() {
        let id = Uuid::parse_str("3f2a9c1d-0000-4000-8000-000000000000").unwrap();
        assert_eq!(reference_code(id), "BMS-3F2A9C1D");
    }

    #[test]
    fn hold_ends_at_its_expiry_instant() {
        let now = Utc::now();
        let booking = Booking::pending(
            Uuid::new_v4(),
            "h".to_string(),
            1,
            vec![1],
            now,
            now + chrono::Duration::seconds(60),
        );
        assert!(!booking.is_lock_expired(now + chrono::Duration::seconds(59)));
        assert!(booking.is_lock_expired(booking.lock_expires_at));
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!BookingStatus::Pending.is_terminal());
        for status in [BookingStatus::Confirmed, BookingStatus::Cancelled, BookingStatus::Expired] {
            assert!(status.is_terminal());
            assert_eq!(BookingStatus::parse(status.as_str()), Some(status));
        }
    }
}
