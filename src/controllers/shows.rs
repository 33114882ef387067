use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::error::ReservationError;
use crate::models::{SeatMap, ShowId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/shows/{show_id}/seats", get(get_seat_map))
}

// GET /api/shows/{show_id}/seats
async fn get_seat_map(
    State(state): State<Arc<AppState>>,
    Path(show_id): Path<ShowId>,
) -> Result<Json<SeatMap>, ReservationError> {
    let map = match &state.cache {
        Some(cache) => cache.seat_map(&state.reservations, show_id).await?,
        None => state.reservations.seat_map(show_id).await?,
    };
    Ok(Json(map))
}
