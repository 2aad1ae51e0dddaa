//! # Round Scheduler
//!
//! Drives the polling cadence around the prediction contract's round
//! boundaries: `Waiting -> Fetching -> Waiting` forever, until cancelled.
//!
//! Each tick reads the current epoch and round, derives the time until the
//! round's lock boundary, and picks the next delay: intensive (~1s) when the
//! boundary is imminent, relaxed (~3s) otherwise. Lock is the boundary that
//! matters for a bet watcher; last-second bets land just before it. Errors
//! during a tick never stop the loop; they schedule a retry after a short
//! fixed delay and let the endpoint pool's own backoff handle sustained
//! outages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::ChainReader;
use crate::config::SchedulerSettings;
use crate::errors::ChainError;

/// Receives each completed timing tick. The monitor side uses this to
/// refresh watched-address histories.
#[async_trait]
pub trait TickSink: Send + Sync {
    async fn on_tick(&self, epoch: u64) -> Result<(), ChainError>;
}

/// Picks the next tick delay from the time remaining until the lock
/// boundary. Pure so the cadence switch is testable in isolation.
pub fn tick_delay(
    time_until_lock_ms: i64,
    settings: &SchedulerSettings,
    force_intensive: bool,
) -> Duration {
    let threshold_ms = (settings.intensive_threshold_secs as i64).saturating_mul(1_000);
    let imminent = time_until_lock_ms > 0 && time_until_lock_ms <= threshold_ms;
    if force_intensive || imminent {
        settings.intensive_interval()
    } else {
        settings.relaxed_interval()
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct RoundScheduler {
    reader: Arc<ChainReader>,
    settings: SchedulerSettings,
    sink: Arc<dyn TickSink>,
    force_intensive: Arc<AtomicBool>,
    token: CancellationToken,
}

impl RoundScheduler {
    pub fn new(
        reader: Arc<ChainReader>,
        settings: SchedulerSettings,
        sink: Arc<dyn TickSink>,
        force_intensive: Arc<AtomicBool>,
        token: CancellationToken,
    ) -> Self {
        Self { reader, settings, sink, force_intensive, token }
    }

    /// Spawns the polling loop. The task exits only when the cancellation
    /// token fires.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(target: "round_scheduler", "Polling loop started");
        loop {
            let delay = match self.tick().await {
                Ok(delay) => delay,
                Err(e) => {
                    warn!(
                        target: "round_scheduler",
                        error = %e,
                        retry_ms = self.settings.error_retry_ms,
                        "Tick failed; retrying after fallback delay"
                    );
                    self.settings.error_retry()
                }
            };

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        info!(target: "round_scheduler", "Polling loop stopped");
    }

    async fn tick(&self) -> Result<Duration, ChainError> {
        let epoch = self.reader.current_epoch().await?;
        let round = self.reader.round_info(epoch).await?;

        let time_until_lock_ms = (round.lock_timestamp as i64)
            .saturating_mul(1_000)
            .saturating_sub(now_unix_ms());
        let delay = tick_delay(
            time_until_lock_ms,
            &self.settings,
            self.force_intensive.load(Ordering::Relaxed),
        );
        debug!(
            target: "round_scheduler",
            epoch,
            time_until_lock_ms,
            next_tick_ms = delay.as_millis() as u64,
            "Tick complete"
        );

        self.sink.on_tick(epoch).await?;
        Ok(delay)
    }
}
