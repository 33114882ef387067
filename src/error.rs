use uuid::Uuid;

use crate::models::{BookingStatus, SeatId};

/// Failures of the reservation core. Every variant is scoped to a single request.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("seats unavailable: {seats:?}")]
    SeatUnavailable { seats: Vec<SeatId> },

    #[error("not found: {0}")]
    NotFound(String),

    /// Lost a race against another transition; the whole operation may be retried.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock for booking {0} has expired")]
    LockExpired(Uuid),

    #[error("booking {booking_id} is already {status}")]
    AlreadyFinalized {
        booking_id: Uuid,
        status: BookingStatus,
    },

    #[error("corrupted reservation state: {0}")]
    Corrupted(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ReservationError {
    pub fn code(&self) -> &'static str {
        match self {
            ReservationError::InvalidRequest(_) => "INVALID_REQUEST",
            ReservationError::SeatUnavailable { .. } => "SEAT_UNAVAILABLE",
            ReservationError::NotFound(_) => "NOT_FOUND",
            ReservationError::Conflict(_) => "CONFLICT",
            ReservationError::LockExpired(_) => "LOCK_EXPIRED",
            ReservationError::AlreadyFinalized { .. } => "ALREADY_FINALIZED",
            ReservationError::Corrupted(_) => "CORRUPTED",
            ReservationError::Storage(_) => "STORAGE",
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, ReservationError::Conflict(_))
    }

    pub(crate) fn booking_not_found(booking_id: Uuid) -> Self {
        ReservationError::NotFound(format!("booking {}", booking_id))
    }
}

pub type ReservationResult<T> = Result<T, ReservationError>;
