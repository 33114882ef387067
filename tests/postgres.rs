//! Conditional updates against a real Postgres.
//!
//! These tests are `#[ignore]` by default because they need a database.
//! Run with: `DATABASE_URL=postgres://... cargo test --test postgres -- --ignored`

#![allow(clippy::unwrap_used)]

mod common;

use chrono::{Duration, TimeZone, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use common::{seats, show, start_clock, SHOW};
use seat_reservation::clock::{truncate, Clock};
use seat_reservation::config::ReservationConfig;
use seat_reservation::inventory::{PgInventory, SeatInventory};
use seat_reservation::models::{BookingStatus, SeatLock, SeatStatus};
use seat_reservation::services::ReservationService;
use seat_reservation::ReservationError;

async fn pg_inventory(pool: &PgPool, seat_count: i64) -> PgInventory {
    let inventory = PgInventory::new(pool.clone());
    inventory
        .register_show(&show(), &seats(seat_count))
        .await
        .unwrap();
    inventory
}

/// Serialized show, seat states and bookings as stored.
async fn image(inventory: &PgInventory, booking_ids: &[Uuid]) -> Vec<u8> {
    let show = inventory.get_show(SHOW).await.unwrap();
    let seats = inventory.list_seats(SHOW).await.unwrap();
    let mut bookings = Vec::new();
    for id in booking_ids {
        bookings.push(inventory.get_booking(*id).await.unwrap());
    }
    serde_json::to_vec(&(show, seats, bookings)).unwrap()
}

fn lock(expires_at: chrono::DateTime<Utc>) -> SeatLock {
    SeatLock {
        holder: "pg@example.com".to_string(),
        booking_id: Uuid::new_v4(),
        expires_at,
    }
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore] // Requires Postgres
async fn stale_expectation_is_a_conflict(pool: PgPool) {
    let inventory = pg_inventory(&pool, 2).await;
    let held = lock(truncate(Utc::now()) + Duration::minutes(10));
    inventory
        .transition(SHOW, 1, &SeatStatus::Available, SeatStatus::Locked(held.clone()))
        .await
        .unwrap();

    // Same holder and booking, expiry off by one millisecond
    let shifted = SeatStatus::Locked(SeatLock {
        expires_at: held.expires_at + Duration::milliseconds(1),
        ..held.clone()
    });
    let err = inventory
        .transition(SHOW, 1, &shifted, SeatStatus::Available)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Conflict(_)));

    let err = inventory
        .transition(SHOW, 1, &SeatStatus::Available, SeatStatus::Available)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::Conflict(_)));

    let err = inventory
        .transition(SHOW, 99, &SeatStatus::Available, SeatStatus::Available)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::NotFound(_)));

    let states = inventory.get_states(SHOW, &[1]).await.unwrap();
    assert_eq!(states[0].status, SeatStatus::Locked(held));
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore] // Requires Postgres
async fn millisecond_expiry_survives_round_trip(pool: PgPool) {
    let inventory = pg_inventory(&pool, 1).await;
    let expires_at = Utc.timestamp_millis_opt(1_741_975_200_123).unwrap();
    let held = SeatStatus::Locked(lock(expires_at));

    inventory
        .transition(SHOW, 1, &SeatStatus::Available, held.clone())
        .await
        .unwrap();

    let read = inventory.get_states(SHOW, &[1]).await.unwrap().remove(0);
    assert_eq!(read.status, held);

    // The value read back is a valid expectation for the next transition
    inventory
        .transition(SHOW, 1, &read.status, SeatStatus::Available)
        .await
        .unwrap();
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore] // Requires Postgres
async fn confirm_and_cancel_have_one_winner(pool: PgPool) {
    let inventory: Arc<dyn SeatInventory> = Arc::new(pg_inventory(&pool, 2).await);
    let service = ReservationService::new(
        inventory,
        Arc::new(start_clock()),
        ReservationConfig::default(),
    );
    let handle = service
        .acquire_lock(SHOW, &[1, 2], "racer", None)
        .await
        .unwrap();
    let booking_id = handle.booking_id;

    let confirm = {
        let service = service.clone();
        tokio::spawn(async move { service.confirm(booking_id).await })
    };
    let cancel = {
        let service = service.clone();
        tokio::spawn(async move { service.cancel(booking_id).await })
    };
    let confirmed = confirm.await.unwrap();
    let cancelled = cancel.await.unwrap();
    assert!(confirmed.is_ok() ^ cancelled.is_ok());

    let booking = service.get_booking(booking_id).await.unwrap();
    let statuses: Vec<SeatStatus> = service
        .inventory()
        .get_states(SHOW, &[1, 2])
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.status)
        .collect();
    if confirmed.is_ok() {
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert!(statuses.iter().all(|s| *s == SeatStatus::Booked { booking_id }));
    } else {
        assert_eq!(booking.status, BookingStatus::Cancelled);
        assert!(statuses.iter().all(|s| *s == SeatStatus::Available));
    }
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore] // Requires Postgres
async fn finalized_state_reads_back_identically(pool: PgPool) {
    let clock = start_clock();
    clock.advance(Duration::milliseconds(457));
    let service = ReservationService::new(
        Arc::new(pg_inventory(&pool, 4).await),
        Arc::new(clock.clone()),
        ReservationConfig::default(),
    );

    let kept = service.acquire_lock(SHOW, &[1, 2], "keeper", None).await.unwrap();
    service.confirm(kept.booking_id).await.unwrap();
    let dropped = service.acquire_lock(SHOW, &[3], "dropper", None).await.unwrap();
    service.cancel(dropped.booking_id).await.unwrap();
    let pending = service.acquire_lock(SHOW, &[4], "waiter", None).await.unwrap();
    assert_eq!(pending.lock_expires_at, clock.now() + Duration::seconds(600));

    let ids = [kept.booking_id, dropped.booking_id, pending.booking_id];
    let before = image(&PgInventory::new(pool.clone()), &ids).await;
    // A fresh instance over the same database, as after a restart
    let after = image(&PgInventory::new(pool.clone()), &ids).await;
    assert_eq!(before, after);

    let restarted = PgInventory::new(pool);
    let seats = restarted.list_seats(SHOW).await.unwrap();
    assert_eq!(seats[0].status, SeatStatus::Booked { booking_id: kept.booking_id });
    assert_eq!(seats[2].status, SeatStatus::Available);
    assert!(seats[3].status.is_locked_by(pending.booking_id));
    assert_eq!(
        restarted.get_booking(pending.booking_id).await.unwrap().lock_expires_at,
        pending.lock_expires_at
    );
}
