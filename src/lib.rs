pub mod cache;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod inventory;
pub mod models;
pub mod redis_client;
pub mod seed;
pub mod services;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::{Config, StorageBackend};
use crate::inventory::{MemoryInventory, SeatInventory};
use crate::services::ReservationService;

pub use crate::error::{ReservationError, ReservationResult};

// Shared state for the whole application
#[derive(Clone)]
pub struct AppState {
    pub reservations: ReservationService,
    pub cache: Option<cache::SeatMapCache>,
    pub config: Config,
}

impl AppState {
    /// Connects the configured backend (running migrations for Postgres) and, when a
    /// Redis URL is set, the seat map cache.
    pub async fn new(
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let inventory: Arc<dyn SeatInventory> = match config.database.backend {
            StorageBackend::Postgres => {
                let db = database::Database::new(&config.database.url, config.database.pool_size)
                    .await?;
                info!("Database connected");
                db.run_migrations().await?;
                Arc::new(db.inventory())
            }
            StorageBackend::Memory => {
                warn!("Using in-memory inventory, state is lost on restart");
                Arc::new(MemoryInventory::new())
            }
        };

        if config.app.seed_demo {
            seed::seed_demo(inventory.as_ref()).await?;
        }

        let cache = match &config.redis.url {
            Some(url) => match connect_redis(url).await {
                Ok(redis) => {
                    info!("Redis connected");
                    Some(cache::SeatMapCache::new(redis, config.cache.seat_map_ttl_secs))
                }
                Err(e) => {
                    warn!("Redis unavailable, seat maps served uncached: {}", e);
                    None
                }
            },
            None => None,
        };

        let reservations = ReservationService::new(inventory, clock, config.reservation.clone());
        Ok(Arc::new(Self {
            reservations,
            cache,
            config,
        }))
    }
}

async fn connect_redis(url: &str) -> redis::RedisResult<redis_client::RedisClient> {
    let redis = redis_client::RedisClient::new(url).await?;
    redis.ping().await?;
    Ok(redis)
}

/// The HTTP application: health probe plus the `/api` routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Seat Reservation API v1.0" }))
        .merge(controllers::health_route())
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
