use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use super::{invalidate_seat_map, validate};
use crate::error::ReservationError;
use crate::models::{Booking, LockHandle, SeatId, ShowId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/locks", post(acquire_lock))
        .route("/locks/{booking_id}/renew", patch(renew_lock))
        .route("/locks/{booking_id}", delete(release_lock))
}

// POST /api/locks
#[derive(Debug, Deserialize, Validate)]
pub struct LockRequest {
    #[validate(range(min = 1))]
    pub show_id: ShowId,
    #[validate(length(min = 1))]
    pub seat_ids: Vec<SeatId>,
    #[validate(length(min = 1, max = 128))]
    pub holder: String,
    #[validate(range(min = 1))]
    pub hold_seconds: Option<u64>,
}

async fn acquire_lock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LockRequest>,
) -> Result<(StatusCode, Json<LockHandle>), ReservationError> {
    validate(&req)?;

    let handle = state
        .reservations
        .acquire_lock(
            req.show_id,
            &req.seat_ids,
            &req.holder,
            req.hold_seconds.map(Duration::from_secs),
        )
        .await?;

    invalidate_seat_map(&state, handle.show_id).await;
    Ok((StatusCode::CREATED, Json(handle)))
}

// PATCH /api/locks/{booking_id}/renew
#[derive(Debug, Deserialize, Validate)]
pub struct RenewRequest {
    #[validate(range(min = 1))]
    pub extend_seconds: u64,
}

async fn renew_lock(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<RenewRequest>,
) -> Result<Json<Booking>, ReservationError> {
    validate(&req)?;

    let booking = state
        .reservations
        .renew_lock(booking_id, Duration::from_secs(req.extend_seconds))
        .await?;

    invalidate_seat_map(&state, booking.show_id).await;
    Ok(Json(booking))
}

// DELETE /api/locks/{booking_id}
async fn release_lock(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
) -> Result<StatusCode, ReservationError> {
    state.reservations.release_lock(booking_id).await?;

    let booking = state.reservations.get_booking(booking_id).await?;
    invalidate_seat_map(&state, booking.show_id).await;
    Ok(StatusCode::NO_CONTENT)
}
