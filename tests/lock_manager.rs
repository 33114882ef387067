//! Lock acquisition, renewal and release against the in-memory inventory.

#![allow(clippy::unwrap_used)]

mod common;

use common::{is_available, Harness, SHOW};
use fake::faker::internet::en::SafeEmail;
use fake::Fake;
use proptest::prelude::*;
use std::time::Duration;

use seat_reservation::clock::Clock;
use seat_reservation::inventory::SeatInventory;
use seat_reservation::models::{BookingStatus, SeatStatus, ShowStatus};
use seat_reservation::ReservationError;

#[tokio::test]
async fn second_customer_gets_remaining_seat_after_first_confirms() {
    let h = Harness::new(3).await;

    let x = h
        .service
        .acquire_lock(SHOW, &[1, 2], "x@example.com", Some(Duration::from_secs(600)))
        .await
        .unwrap();
    assert_eq!(x.seat_ids, vec![1, 2]);

    let err = h
        .service
        .acquire_lock(SHOW, &[2, 3], "y@example.com", None)
        .await
        .unwrap_err();
    match err {
        ReservationError::SeatUnavailable { seats } => assert_eq!(seats, vec![2]),
        other => panic!("expected SeatUnavailable, got {:?}", other),
    }
    assert!(is_available(&h.statuses(&[3]).await[0]));

    let confirmed = h.service.confirm(x.booking_id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    let y = h
        .service
        .acquire_lock(SHOW, &[3], "y@example.com", None)
        .await
        .unwrap();
    assert_eq!(y.seat_ids, vec![3]);
}

#[tokio::test]
async fn failed_acquire_leaves_no_partial_locks() {
    let h = Harness::new(3).await;
    h.service
        .acquire_lock(SHOW, &[3], "first", None)
        .await
        .unwrap();

    let err = h
        .service
        .acquire_lock(SHOW, &[1, 2, 3], "second", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::SeatUnavailable { ref seats } if seats == &vec![3]));

    let statuses = h.statuses(&[1, 2]).await;
    assert!(statuses.iter().all(is_available));
    assert!(h
        .service
        .list_for_holder("second", None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn seat_ids_are_locked_in_ascending_order() {
    let h = Harness::new(5).await;
    let handle = h
        .service
        .acquire_lock(SHOW, &[5, 1, 3], "sorter", None)
        .await
        .unwrap();
    assert_eq!(handle.seat_ids, vec![1, 3, 5]);
    assert!(handle.reference.starts_with("BMS-"));
    assert_eq!(
        handle.lock_expires_at,
        h.clock.now() + chrono::Duration::seconds(600)
    );
}

#[tokio::test]
async fn rejects_malformed_requests() {
    let h = Harness::new(12).await;

    let cases: Vec<(Vec<i64>, &str, Option<Duration>)> = vec![
        (vec![], "holder", None),
        (vec![1, 1], "holder", None),
        ((1..=11).collect(), "holder", None),
        (vec![1], "   ", None),
        (vec![1], "holder", Some(Duration::ZERO)),
        (vec![1], "holder", Some(Duration::from_secs(601))),
        (vec![99], "holder", None),
    ];

    for (seat_ids, holder, hold) in cases {
        let err = h
            .service
            .acquire_lock(SHOW, &seat_ids, holder, hold)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ReservationError::InvalidRequest(_)),
            "{:?} / {:?} gave {:?}",
            seat_ids,
            holder,
            err
        );
    }

    let err = h
        .service
        .acquire_lock(404, &[1], "holder", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::NotFound(_)));
}

#[tokio::test]
async fn cancelled_show_takes_no_locks() {
    let h = Harness::new(2).await;
    h.inventory
        .set_show_status(SHOW, ShowStatus::Available, ShowStatus::Cancelled)
        .await
        .unwrap();

    let err = h
        .service
        .acquire_lock(SHOW, &[1], "late", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationError::InvalidRequest(_)));
}

#[tokio::test]
async fn lapsed_lock_is_taken_over_by_next_customer() {
    let h = Harness::new(2).await;
    let stale = h
        .service
        .acquire_lock(SHOW, &[1, 2], "slow", Some(Duration::from_secs(60)))
        .await
        .unwrap();

    h.advance_secs(61);
    let fresh = h
        .service
        .acquire_lock(SHOW, &[2], "quick", None)
        .await
        .unwrap();

    let statuses = h.statuses(&[1, 2]).await;
    assert!(is_available(&statuses[0]));
    assert!(statuses[1].is_locked_by(fresh.booking_id));

    let old = h.service.get_booking(stale.booking_id).await.unwrap();
    assert_eq!(old.status, BookingStatus::Expired);
}

#[tokio::test]
async fn renew_extends_booking_and_every_seat() {
    let h = Harness::new(2).await;
    let handle = h
        .service
        .acquire_lock(SHOW, &[1, 2], "renewer", Some(Duration::from_secs(120)))
        .await
        .unwrap();

    h.advance_secs(100);
    let renewed = h
        .service
        .renew_lock(handle.booking_id, Duration::from_secs(300))
        .await
        .unwrap();
    assert_eq!(
        renewed.lock_expires_at,
        handle.lock_expires_at + chrono::Duration::seconds(300)
    );

    for status in h.statuses(&[1, 2]).await {
        let lock = status.lock().cloned().unwrap();
        assert_eq!(lock.expires_at, renewed.lock_expires_at);
    }

    // Past the original expiry but inside the renewed one
    h.advance_secs(60);
    assert_eq!(h.service.sweeper().run_once().await.unwrap().scanned, 0);
    h.service.confirm(handle.booking_id).await.unwrap();
}

#[tokio::test]
async fn renew_is_refused_once_expired_or_finalized() {
    let h = Harness::new(3).await;
    let lapsed = h
        .service
        .acquire_lock(SHOW, &[1], "a", Some(Duration::from_secs(30)))
        .await
        .unwrap();
    let confirmed = h.service.acquire_lock(SHOW, &[2], "b", None).await.unwrap();
    h.service.confirm(confirmed.booking_id).await.unwrap();

    let too_long = h
        .service
        .renew_lock(confirmed.booking_id, Duration::from_secs(601))
        .await
        .unwrap_err();
    assert!(matches!(too_long, ReservationError::InvalidRequest(_)));

    let finalized = h
        .service
        .renew_lock(confirmed.booking_id, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(
        finalized,
        ReservationError::AlreadyFinalized {
            status: BookingStatus::Confirmed,
            ..
        }
    ));

    h.advance_secs(31);
    let expired = h
        .service
        .renew_lock(lapsed.booking_id, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(matches!(expired, ReservationError::LockExpired(id) if id == lapsed.booking_id));
}

#[tokio::test]
async fn release_frees_seats_and_is_idempotent() {
    let h = Harness::new(2).await;
    let handle = h
        .service
        .acquire_lock(SHOW, &[1, 2], "leaver", None)
        .await
        .unwrap();

    h.service.release_lock(handle.booking_id).await.unwrap();
    h.service.release_lock(handle.booking_id).await.unwrap();

    assert!(h.statuses(&[1, 2]).await.iter().all(is_available));
    let booking = h.service.get_booking(handle.booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);

    let unknown = h.service.release_lock(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(unknown, ReservationError::NotFound(_)));
}

#[tokio::test]
async fn holder_sees_own_bookings_newest_first() {
    let h = Harness::new(4).await;
    let holder: String = SafeEmail().fake();

    let first = h.service.acquire_lock(SHOW, &[1], &holder, None).await.unwrap();
    h.advance_secs(1);
    let second = h.service.acquire_lock(SHOW, &[2], &holder, None).await.unwrap();
    h.service.cancel(first.booking_id).await.unwrap();

    let all = h.service.list_for_holder(&holder, None).await.unwrap();
    let ids: Vec<_> = all.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![second.booking_id, first.booking_id]);

    let pending = h
        .service
        .list_for_holder(&holder, Some(BookingStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let by_ref = h.service.find_by_reference(&second.reference).await.unwrap();
    assert_eq!(by_ref.id, second.booking_id);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever is already held, a request either locks all of its seats or none.
    #[test]
    fn acquire_is_all_or_nothing(
        held in proptest::collection::btree_set(1i64..=8, 0..4),
        wanted in proptest::collection::btree_set(1i64..=8, 1..5),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = Harness::new(8).await;
            if !held.is_empty() {
                let held: Vec<i64> = held.iter().copied().collect();
                h.service.acquire_lock(SHOW, &held, "owner", None).await.unwrap();
            }

            let wanted: Vec<i64> = wanted.iter().copied().collect();
            let result = h.service.acquire_lock(SHOW, &wanted, "taker", None).await;
            let overlap: Vec<i64> = wanted.iter().copied().filter(|s| held.contains(s)).collect();

            let statuses = h.statuses(&wanted).await;
            match result {
                Ok(handle) => {
                    prop_assert!(overlap.is_empty());
                    prop_assert!(statuses.iter().all(|s| s.is_locked_by(handle.booking_id)));
                }
                Err(ReservationError::SeatUnavailable { seats }) => {
                    prop_assert_eq!(seats, overlap);
                    for (seat, status) in wanted.iter().zip(&statuses) {
                        let expected_free = !held.contains(seat);
                        prop_assert_eq!(*status == SeatStatus::Available, expected_free);
                    }
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
