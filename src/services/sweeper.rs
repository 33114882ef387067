use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::reclaim::{reclaim_stale, ReclaimOutcome};
use crate::clock::Clock;
use crate::error::ReservationResult;
use crate::inventory::{ExpiredLockCursor, LockStats, SeatInventory};

/// Periodically frees seats whose locks lapsed without confirm or cancel.
///
/// Everything it needs is in the inventory, so a sweeper started after a restart
/// picks up locks that expired while the process was down.
#[derive(Clone)]
pub struct ExpirySweeper {
    inventory: Arc<dyn SeatInventory>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired locks found in this pass.
    pub scanned: usize,
    /// Seats released or rolled forward to booked.
    pub reclaimed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.scanned == 0
    }
}

impl ExpirySweeper {
    pub fn new(inventory: Arc<dyn SeatInventory>, clock: Arc<dyn Clock>, batch_size: usize) -> Self {
        Self {
            inventory,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    /// One pass over every lock that expired before now, fetched `batch_size` at a time.
    ///
    /// Pages continue after the last row seen, so rows that are skipped (a renew still
    /// finishing, say) do not hold back the ones behind them.
    pub async fn run_once(&self) -> ReservationResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut after: Option<ExpiredLockCursor> = None;

        loop {
            let page = self
                .inventory
                .find_expired_locks(now, after, self.batch_size)
                .await?;
            report.scanned += page.len();

            for state in &page {
                match reclaim_stale(self.inventory.as_ref(), state, now).await {
                    Ok(ReclaimOutcome::Released) | Ok(ReclaimOutcome::RolledForward) => {
                        report.reclaimed += 1;
                    }
                    Ok(ReclaimOutcome::Expired { released }) => report.reclaimed += released,
                    Ok(ReclaimOutcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        warn!(
                            "🧹 Failed to reclaim seat {} of show {}: {}",
                            state.seat_id, state.show_id, e
                        );
                        report.failed += 1;
                    }
                }
            }

            if page.len() < self.batch_size {
                break;
            }
            match page.last().and_then(ExpiredLockCursor::at) {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        Ok(report)
    }

    /// Runs `run_once` every `interval` until `shutdown` turns true or its sender is dropped.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("🧹 Expiry sweeper started, interval {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(report) if report.is_idle() => debug!("🧹 No expired locks"),
                            Ok(report) => info!(
                                "🧹 Sweep done: {} scanned, {} reclaimed, {} skipped, {} failed",
                                report.scanned, report.reclaimed, report.skipped, report.failed
                            ),
                            Err(e) => error!("🧹 Sweep failed: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("🧹 Expiry sweeper stopped");
        })
    }

    /// Lock counts for monitoring.
    pub async fn stats(&self) -> ReservationResult<LockStats> {
        self.inventory.lock_stats(self.clock.now()).await
    }
}
