pub mod bookings;
pub mod locks;
pub mod shows;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};
use validator::Validate;

use crate::error::ReservationError;
use crate::inventory::LockStats;
use crate::models::{SeatId, ShowId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(shows::routes())
        .merge(locks::routes())
        .merge(bookings::routes())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub locks: LockStats,
}

// GET /health
pub async fn health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ReservationError> {
    let locks = state.reservations.sweeper().stats().await?;
    Ok(Json(HealthResponse { status: "ok", locks }))
}

pub fn health_route() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    seats: Option<Vec<SeatId>>,
}

impl ReservationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReservationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
            ReservationError::SeatUnavailable { .. }
            | ReservationError::Conflict(_)
            | ReservationError::AlreadyFinalized { .. } => StatusCode::CONFLICT,
            ReservationError::LockExpired(_) => StatusCode::GONE,
            ReservationError::Corrupted(_) | ReservationError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ReservationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }

        let seats = match &self {
            ReservationError::SeatUnavailable { seats } => Some(seats.clone()),
            _ => None,
        };
        let message = match &self {
            // Storage details stay in the logs
            ReservationError::Storage(_) => "storage failure".to_string(),
            other => other.to_string(),
        };
        let body = ErrorBody {
            code: self.code(),
            message,
            seats,
        };
        (status, Json(body)).into_response()
    }
}

/* ---------- helpers ---------- */

fn validate<T: Validate>(request: &T) -> Result<(), ReservationError> {
    request
        .validate()
        .map_err(|e| ReservationError::InvalidRequest(e.to_string()))
}

async fn invalidate_seat_map(state: &AppState, show_id: ShowId) {
    if let Some(cache) = &state.cache {
        cache.invalidate_show(show_id).await;
    }
}
