use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{describe_seat, ExpiredLockCursor, LockStats, SeatInventory};
use crate::error::{ReservationError, ReservationResult};
use crate::models::{
    Booking, BookingState, BookingStatus, Seat, SeatId, SeatLock, SeatStatus, Show, ShowId,
    ShowSeatState, ShowStatus,
};

const SEAT_COLUMNS: &str = "show_id, seat_id, status, lock_holder, lock_expires_at, booking_id";
const BOOKING_COLUMNS: &str =
    "id, reference, holder, show_id, seat_ids, status, lock_expires_at, created_at, updated_at";

/// Inventory persisted in Postgres. Every transition is a single conditional
/// `UPDATE ... WHERE <expected columns>`, so it is safe across service instances.
#[derive(Clone)]
pub struct PgInventory {
    pool: PgPool,
}

impl PgInventory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn show_exists(&self, show_id: ShowId) -> ReservationResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM shows WHERE id = $1)")
            .bind(show_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn ensure_show(&self, show_id: ShowId) -> ReservationResult<()> {
        if self.show_exists(show_id).await? {
            Ok(())
        } else {
            Err(ReservationError::NotFound(format!("show {}", show_id)))
        }
    }

    async fn fetch_seat(
        &self,
        show_id: ShowId,
        seat_id: SeatId,
    ) -> ReservationResult<Option<ShowSeatState>> {
        let row = sqlx::query_as::<_, ShowSeatRow>(&format!(
            "SELECT {} FROM show_seats WHERE show_id = $1 AND seat_id = $2",
            SEAT_COLUMNS
        ))
        .bind(show_id)
        .bind(seat_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ShowSeatState::try_from).transpose()
    }
}

#[derive(FromRow)]
struct ShowRow {
    id: i64,
    movie_id: i64,
    screen_id: i64,
    starts_at: DateTime<Utc>,
    status: String,
}

impl TryFrom<ShowRow> for Show {
    type Error = ReservationError;

    fn try_from(row: ShowRow) -> Result<Self, Self::Error> {
        let status = ShowStatus::parse(&row.status).ok_or_else(|| {
            ReservationError::Corrupted(format!("show {} has status {}", row.id, row.status))
        })?;
        Ok(Show {
            id: row.id,
            movie_id: row.movie_id,
            screen_id: row.screen_id,
            starts_at: row.starts_at,
            status,
        })
    }
}

#[derive(FromRow)]
struct ShowSeatRow {
    show_id: i64,
    seat_id: i64,
    status: String,
    lock_holder: Option<String>,
    lock_expires_at: Option<DateTime<Utc>>,
    booking_id: Option<Uuid>,
}

impl TryFrom<ShowSeatRow> for ShowSeatState {
    type Error = ReservationError;

    fn try_from(row: ShowSeatRow) -> Result<Self, Self::Error> {
        let status = match (
            row.status.as_str(),
            row.lock_holder,
            row.lock_expires_at,
            row.booking_id,
        ) {
            ("AVAILABLE", None, None, None) => SeatStatus::Available,
            ("LOCKED", Some(holder), Some(expires_at), Some(booking_id)) => {
                SeatStatus::Locked(SeatLock {
                    holder,
                    booking_id,
                    expires_at,
                })
            }
            ("BOOKED", None, None, Some(booking_id)) => SeatStatus::Booked { booking_id },
            (status, ..) => {
                return Err(ReservationError::Corrupted(format!(
                    "{} has inconsistent {} row",
                    describe_seat(row.show_id, row.seat_id),
                    status
                )))
            }
        };
        Ok(ShowSeatState {
            show_id: row.show_id,
            seat_id: row.seat_id,
            status,
        })
    }
}

/// Column values for a seat status: (status, lock_holder, lock_expires_at, booking_id).
fn seat_columns(
    status: &SeatStatus,
) -> (&'static str, Option<String>, Option<DateTime<Utc>>, Option<Uuid>) {
    match status {
        SeatStatus::Available => ("AVAILABLE", None, None, None),
        SeatStatus::Locked(lock) => (
            "LOCKED",
            Some(lock.holder.clone()),
            Some(lock.expires_at),
            Some(lock.booking_id),
        ),
        SeatStatus::Booked { booking_id } => ("BOOKED", None, None, Some(*booking_id)),
    }
}

#[derive(FromRow)]
struct BookingRow {
    id: Uuid,
    reference: String,
    holder: String,
    show_id: i64,
    seat_ids: Vec<i64>,
    status: String,
    lock_expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = ReservationError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status = BookingStatus::parse(&row.status).ok_or_else(|| {
            ReservationError::Corrupted(format!("booking {} has status {}", row.id, row.status))
        })?;
        Ok(Booking {
            id: row.id,
            reference: row.reference,
            holder: row.holder,
            show_id: row.show_id,
            seat_ids: row.seat_ids,
            status,
            lock_expires_at: row.lock_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl SeatInventory for PgInventory {
    async fn register_show(&self, show: &Show, seats: &[Seat]) -> ReservationResult<()> {
        if let Some(foreign) = seats.iter().find(|s| s.screen_id != show.screen_id) {
            return Err(ReservationError::InvalidRequest(format!(
                "seat {} belongs to screen {}, not {}",
                foreign.id, foreign.screen_id, show.screen_id
            )));
        }

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO shows (id, movie_id, screen_id, starts_at, status)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(show.id)
        .bind(show.movie_id)
        .bind(show.screen_id)
        .bind(show.starts_at)
        .bind(show.status.as_str())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(ReservationError::InvalidRequest(format!(
                "show {} is already registered",
                show.id
            )));
        }

        for seat in seats {
            sqlx::query(
                "INSERT INTO seats (id, screen_id, row_label, number, category, is_active)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(seat.id)
            .bind(seat.screen_id)
            .bind(&seat.row)
            .bind(seat.number)
            .bind(seat.category.as_str())
            .bind(seat.is_active)
            .execute(&mut *tx)
            .await?;

            if seat.is_active {
                sqlx::query(
                    "INSERT INTO show_seats (show_id, seat_id, status)
                     VALUES ($1, $2, 'AVAILABLE')
                     ON CONFLICT DO NOTHING",
                )
                .bind(show.id)
                .bind(seat.id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!("Registered show {} with {} seats", show.id, seats.len());
        Ok(())
    }

    async fn get_show(&self, show_id: ShowId) -> ReservationResult<Show> {
        let row = sqlx::query_as::<_, ShowRow>(
            "SELECT id, movie_id, screen_id, starts_at, status FROM shows WHERE id = $1",
        )
        .bind(show_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ReservationError::NotFound(format!("show {}", show_id)))?;
        Show::try_from(row)
    }

    async fn set_show_status(
        &self,
        show_id: ShowId,
        expected: ShowStatus,
        new: ShowStatus,
    ) -> ReservationResult<Show> {
        let row = sqlx::query_as::<_, ShowRow>(
            "UPDATE shows SET status = $3, updated_at = NOW()
             WHERE id = $1 AND status = $2
             RETURNING id, movie_id, screen_id, starts_at, status",
        )
        .bind(show_id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Show::try_from(row),
            None => {
                let current = self.get_show(show_id).await?;
                Err(ReservationError::Conflict(format!(
                    "show {} is {}, expected {}",
                    show_id,
                    current.status.as_str(),
                    expected.as_str()
                )))
            }
        }
    }

    async fn get_states(
        &self,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> ReservationResult<Vec<ShowSeatState>> {
        self.ensure_show(show_id).await?;

        let rows = sqlx::query_as::<_, ShowSeatRow>(&format!(
            "SELECT {} FROM show_seats WHERE show_id = $1 AND seat_id = ANY($2)",
            SEAT_COLUMNS
        ))
        .bind(show_id)
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut found = rows
            .into_iter()
            .map(ShowSeatState::try_from)
            .collect::<ReservationResult<Vec<_>>>()?;

        seat_ids
            .iter()
            .map(|seat_id| {
                found
                    .iter()
                    .position(|s| s.seat_id == *seat_id)
                    .map(|idx| found.swap_remove(idx))
                    .ok_or_else(|| ReservationError::NotFound(describe_seat(show_id, *seat_id)))
            })
            .collect()
    }

    async fn list_seats(&self, show_id: ShowId) -> ReservationResult<Vec<ShowSeatState>> {
        self.ensure_show(show_id).await?;

        let rows = sqlx::query_as::<_, ShowSeatRow>(&format!(
            "SELECT {} FROM show_seats WHERE show_id = $1 ORDER BY seat_id",
            SEAT_COLUMNS
        ))
        .bind(show_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ShowSeatState::try_from).collect()
    }

    async fn transition(
        &self,
        show_id: ShowId,
        seat_id: SeatId,
        expected: &SeatStatus,
        new: SeatStatus,
    ) -> ReservationResult<ShowSeatState> {
        let (new_status, new_holder, new_expires, new_booking) = seat_columns(&new);
        let (old_status, old_holder, old_expires, old_booking) = seat_columns(expected);

        let row = sqlx::query_as::<_, ShowSeatRow>(&format!(
            "UPDATE show_seats
             SET status = $3, lock_holder = $4, lock_expires_at = $5, booking_id = $6, updated_at = NOW()
             WHERE show_id = $1 AND seat_id = $2
               AND status = $7
               AND lock_holder IS NOT DISTINCT FROM $8
               AND lock_expires_at IS NOT DISTINCT FROM $9
               AND booking_id IS NOT DISTINCT FROM $10
             RETURNING {}",
            SEAT_COLUMNS
        ))
        .bind(show_id)
        .bind(seat_id)
        .bind(new_status)
        .bind(new_holder)
        .bind(new_expires)
        .bind(new_booking)
        .bind(old_status)
        .bind(old_holder)
        .bind(old_expires)
        .bind(old_booking)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return ShowSeatState::try_from(row);
        }

        match self.fetch_seat(show_id, seat_id).await? {
            Some(current) => Err(ReservationError::Conflict(format!(
                "{} is {}, expected {}",
                describe_seat(show_id, seat_id),
                current.status.label(),
                expected.label()
            ))),
            None => {
                self.ensure_show(show_id).await?;
                Err(ReservationError::NotFound(describe_seat(show_id, seat_id)))
            }
        }
    }

    async fn find_expired_locks(
        &self,
        now: DateTime<Utc>,
        after: Option<ExpiredLockCursor>,
        limit: usize,
    ) -> ReservationResult<Vec<ShowSeatState>> {
        let rows = sqlx::query_as::<_, ShowSeatRow>(&format!(
            "SELECT {} FROM show_seats
             WHERE status = 'LOCKED' AND lock_expires_at < $1
               AND ($2::TIMESTAMPTZ IS NULL
                    OR (lock_expires_at, show_id, seat_id) > ($2::TIMESTAMPTZ, $3::BIGINT, $4::BIGINT))
             ORDER BY lock_expires_at, show_id, seat_id
             LIMIT $5",
            SEAT_COLUMNS
        ))
        .bind(now)
        .bind(after.map(|c| c.expires_at))
        .bind(after.map(|c| c.show_id))
        .bind(after.map(|c| c.seat_id))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ShowSeatState::try_from).collect()
    }

    async fn lock_stats(&self, now: DateTime<Utc>) -> ReservationResult<LockStats> {
        let (locked, expired_pending): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE lock_expires_at < $1)
             FROM show_seats WHERE status = 'LOCKED'",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(LockStats {
            locked: locked.max(0) as u64,
            expired_pending: expired_pending.max(0) as u64,
        })
    }

    async fn insert_booking(&self, booking: &Booking) -> ReservationResult<()> {
        let result = sqlx::query(
            "INSERT INTO bookings
                (id, reference, holder, show_id, seat_ids, status, lock_expires_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(booking.id)
        .bind(&booking.reference)
        .bind(&booking.holder)
        .bind(booking.show_id)
        .bind(&booking.seat_ids)
        .bind(booking.status.as_str())
        .bind(booking.lock_expires_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ReservationError::Conflict(format!(
                    "booking {} already exists",
                    booking.id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_booking(&self, booking_id: Uuid) -> ReservationResult<Booking> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ReservationError::booking_not_found(booking_id))?;
        Booking::try_from(row)
    }

    async fn find_booking_by_reference(&self, reference: &str) -> ReservationResult<Booking> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE reference = $1",
            BOOKING_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ReservationError::NotFound(format!("booking reference {}", reference)))?;
        Booking::try_from(row)
    }

    async fn list_bookings_for_holder(
        &self,
        holder: &str,
        status: Option<BookingStatus>,
    ) -> ReservationResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings
             WHERE holder = $1 AND ($2::TEXT IS NULL OR status = $2)
             ORDER BY created_at DESC, id DESC",
            BOOKING_COLUMNS
        ))
        .bind(holder)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Booking::try_from).collect()
    }

    async fn transition_booking(
        &self,
        booking_id: Uuid,
        expected: &BookingState,
        new: BookingState,
        now: DateTime<Utc>,
    ) -> ReservationResult<Booking> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "UPDATE bookings
             SET status = $2, lock_expires_at = $3, updated_at = $4
             WHERE id = $1 AND status = $5 AND lock_expires_at = $6
             RETURNING {}",
            BOOKING_COLUMNS
        ))
        .bind(booking_id)
        .bind(new.status.as_str())
        .bind(new.lock_expires_at)
        .bind(now)
        .bind(expected.status.as_str())
        .bind(expected.lock_expires_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Booking::try_from(row),
            None => {
                let current = self.get_booking(booking_id).await?;
                Err(ReservationError::Conflict(format!(
                    "booking {} is {} until {}, expected {} until {}",
                    booking_id,
                    current.status,
                    current.lock_expires_at,
                    expected.status,
                    expected.lock_expires_at
                )))
            }
        }
    }
}
