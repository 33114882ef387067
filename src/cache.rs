use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::error::ReservationResult;
use crate::models::{SeatMap, ShowId};
use crate::redis_client::RedisClient;
use crate::services::ReservationService;

/// Short-lived Redis copy of each show's seat map.
///
/// Only reads go through here. Lock state itself never lives in Redis, so a stale or
/// missing entry can at worst show a seat in its previous state for one TTL.
#[derive(Clone)]
pub struct SeatMapCache {
    redis: RedisClient,
    ttl_secs: u64,
}

impl SeatMapCache {
    pub fn new(redis: RedisClient, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    /// Cached seat map, loaded from the inventory on a miss.
    pub async fn seat_map(
        &self,
        reservations: &ReservationService,
        show_id: ShowId,
    ) -> ReservationResult<SeatMap> {
        match self.get_seat_map(show_id).await {
            Ok(Some(map)) => return Ok(map),
            Ok(None) => debug!("Seat map of show {} not cached", show_id),
            Err(e) => warn!("Seat map cache read failed for show {}: {}", show_id, e),
        }

        let map = reservations.seat_map(show_id).await?;
        if let Err(e) = self.save_seat_map(&map).await {
            warn!("Seat map cache write failed for show {}: {}", show_id, e);
        }
        Ok(map)
    }

    // Drop the cached map after any change to the show's seats
    pub async fn invalidate_show(&self, show_id: ShowId) {
        let mut conn = self.redis.conn.clone();
        let result: Result<i64, _> = conn.del(seat_map_key(show_id)).await;
        match result {
            Ok(_) => debug!("Invalidated seat map cache for show {}", show_id),
            Err(e) => warn!("Failed to invalidate seat map of show {}: {}", show_id, e),
        }
    }

    async fn get_seat_map(&self, show_id: ShowId) -> Result<Option<SeatMap>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(seat_map_key(show_id)).await?;
        data.map(|json| {
            serde_json::from_str(&json).map_err(|_| {
                redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
            })
        })
        .transpose()
    }

    async fn save_seat_map(&self, map: &SeatMap) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(map).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex::<_, _, ()>(seat_map_key(map.show_id), data, self.ttl_secs.max(1))
            .await
    }
}

fn seat_map_key(show_id: ShowId) -> String {
    format!("seats:{}", show_id)
}
