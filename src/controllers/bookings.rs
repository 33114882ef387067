use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{invalidate_seat_map, validate};
use crate::error::ReservationError;
use crate::models::{Booking, BookingStatus};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(list_bookings))
        .route("/bookings/{booking_id}", get(get_booking))
        .route("/bookings/{booking_id}/confirm", post(confirm_booking))
        .route("/bookings/{booking_id}/cancel", post(cancel_booking))
        .route("/bookings/reference/{reference}", get(find_by_reference))
}

/* ---------- FINALIZATION ---------- */

// POST /api/bookings/{booking_id}/confirm
async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, ReservationError> {
    let result = state.reservations.confirm(booking_id).await;

    // An expired hold is released during the failed confirm, so the map changed too
    match &result {
        Ok(booking) => invalidate_seat_map(&state, booking.show_id).await,
        Err(ReservationError::LockExpired(_)) => {
            if let Ok(booking) = state.reservations.get_booking(booking_id).await {
                invalidate_seat_map(&state, booking.show_id).await;
            }
        }
        Err(_) => {}
    }
    result.map(Json)
}

// POST /api/bookings/{booking_id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, ReservationError> {
    let booking = state.reservations.cancel(booking_id).await?;
    invalidate_seat_map(&state, booking.show_id).await;
    Ok(Json(booking))
}

/* ---------- LOOKUPS ---------- */

// GET /api/bookings/{booking_id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, ReservationError> {
    Ok(Json(state.reservations.get_booking(booking_id).await?))
}

// GET /api/bookings/reference/{reference}
async fn find_by_reference(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<Json<Booking>, ReservationError> {
    let reference = reference.trim().to_uppercase();
    Ok(Json(state.reservations.find_by_reference(&reference).await?))
}

// GET /api/bookings?holder=...&status=...
#[derive(Debug, Deserialize, Validate)]
pub struct BookingsQuery {
    #[validate(length(min = 1, max = 128))]
    pub holder: String,
    pub status: Option<BookingStatus>,
}

async fn list_bookings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, ReservationError> {
    validate(&query)?;
    let bookings = state
        .reservations
        .list_for_holder(&query.holder, query.status)
        .await?;
    Ok(Json(bookings))
}
