//! # Prediction Monitor
//!
//! The composed monitoring session and the API the collaborator layer sees:
//! typed reads, per-wallet history snapshots, live subscriptions, and the
//! round-aware polling loop. Construction wires every component (pool,
//! throttler, reader, deduplicator, watcher) explicitly, so independent
//! sessions and tests never share state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethers::types::Address;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chain::{ChainReader, RpcTransport};
use crate::config::Config;
use crate::contract::bet_filter;
use crate::dedup::EventDeduplicator;
use crate::endpoints::EndpointPool;
use crate::errors::{ChainError, MonitorError};
use crate::fetch::{FetchMode, LogRangeFetcher};
use crate::history;
use crate::scheduler::{RoundScheduler, TickSink};
use crate::throttle::Throttler;
use crate::types::{BetEvent, Round, WalletHistory};
use crate::watch::{BetWatcher, SubscriptionHandle};

pub struct PredictionMonitor {
    config: Config,
    reader: Arc<ChainReader>,
    watcher: Arc<BetWatcher>,
    sync: Arc<HistorySync>,
    force_intensive: Arc<AtomicBool>,
    token: CancellationToken,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PredictionMonitor {
    pub fn new(config: Config, transport: Arc<dyn RpcTransport>) -> Result<Self, MonitorError> {
        config.validate()?;
        let contract = config.contract_address()?;

        let pool = Arc::new(EndpointPool::new(&config.chain.endpoints, &config.rpc));
        let throttler = Arc::new(Throttler::new(&config.rpc));
        let reader = Arc::new(ChainReader::new(
            &config,
            transport,
            pool,
            throttler,
            contract,
        ));
        let dedup = Arc::new(EventDeduplicator::new());
        let token = CancellationToken::new();
        let watcher = Arc::new(BetWatcher::new(reader.clone(), dedup, token.child_token()));
        let sync = Arc::new(HistorySync::new(&config, reader.clone(), watcher.clone()));

        Ok(Self {
            config,
            reader,
            watcher,
            sync,
            force_intensive: Arc::new(AtomicBool::new(false)),
            token,
            scheduler_handle: Mutex::new(None),
        })
    }

    /// Starts the polling loop. Idempotent: a second call while running is
    /// a no-op.
    pub async fn start(&self) {
        let mut handle = self.scheduler_handle.lock().await;
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        let sink: Arc<dyn TickSink> = self.sync.clone();
        let scheduler = RoundScheduler::new(
            self.reader.clone(),
            self.config.scheduler.clone(),
            sink,
            self.force_intensive.clone(),
            self.token.child_token(),
        );
        *handle = Some(scheduler.spawn());
        info!(target: "monitor", "Monitoring session started");
    }

    /// Signals every task to stop and returns without waiting for in-flight
    /// network calls.
    pub fn shutdown(&self) {
        self.token.cancel();
        info!(target: "monitor", "Monitoring session shutting down");
    }

    pub async fn current_epoch(&self) -> Result<u64, ChainError> {
        self.reader.current_epoch().await
    }

    pub async fn round_info(&self, epoch: u64) -> Result<Round, ChainError> {
        self.reader.round_info(epoch).await
    }

    /// Milliseconds until the current round's lock boundary. Negative when
    /// the boundary has already passed.
    pub async fn time_until_next_round(&self) -> Result<i64, ChainError> {
        let epoch = self.reader.current_epoch().await?;
        let round = self.reader.round_info(epoch).await?;
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Ok((round.lock_timestamp as i64).saturating_mul(1_000).saturating_sub(now_ms))
    }

    /// Best-effort history snapshot over the configured block window.
    pub async fn wallet_history(&self, address: Address) -> Result<WalletHistory, ChainError> {
        self.wallet_history_with_mode(address, FetchMode::default()).await
    }

    /// History snapshot with an explicit chunk-failure policy, for callers
    /// that need all-or-nothing completeness.
    pub async fn wallet_history_with_mode(
        &self,
        address: Address,
        mode: FetchMode,
    ) -> Result<WalletHistory, ChainError> {
        self.sync.fetch_history(address, mode).await
    }

    /// Registers a callback for new bets/claims by `address`; dropping (or
    /// explicitly unsubscribing) the returned handle detaches it.
    pub fn subscribe_to_new_bets(
        &self,
        address: Address,
        callback: impl Fn(BetEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.watcher.subscribe(address, callback)
    }

    /// Manual override: pin the scheduler to the intensive cadence.
    pub fn set_polling_intensity(&self, intensive: bool) {
        self.force_intensive.store(intensive, Ordering::Relaxed);
    }
}

/// Scheduler sink: refreshes the history window for every watched address
/// and pushes parsed events through the delivery funnel.
///
/// A full re-scan runs when the epoch advances or the refresh interval
/// elapses, not on every 1-3s timing tick; log queries are the expensive
/// part and bets only change per round.
struct HistorySync {
    reader: Arc<ChainReader>,
    watcher: Arc<BetWatcher>,
    chunk_size: u64,
    window_blocks: u64,
    refresh_interval: Duration,
    state: Mutex<RefreshState>,
}

struct RefreshState {
    last_epoch: Option<u64>,
    last_refresh: Option<Instant>,
}

impl HistorySync {
    fn new(config: &Config, reader: Arc<ChainReader>, watcher: Arc<BetWatcher>) -> Self {
        Self {
            reader,
            watcher,
            chunk_size: config.fetch.blocks_per_chunk,
            window_blocks: config.fetch.history_window_blocks,
            refresh_interval: Duration::from_secs(config.scheduler.history_refresh_secs),
            state: Mutex::new(RefreshState { last_epoch: None, last_refresh: None }),
        }
    }

    async fn fetch_history(
        &self,
        address: Address,
        mode: FetchMode,
    ) -> Result<WalletHistory, ChainError> {
        let head = self.reader.latest_block().await?;
        let from = head.saturating_sub(self.window_blocks);
        let filter = bet_filter(self.reader.contract_address(), Some(address));
        let fetcher = LogRangeFetcher::new(&self.reader, self.chunk_size);
        let fetched = fetcher.fetch_range(&filter, from, head, mode).await?;
        if !fetched.is_complete() {
            warn!(
                target: "monitor",
                address = ?address,
                skipped_chunks = fetched.skipped.len(),
                "Wallet history is a partial snapshot"
            );
        }
        Ok(history::assemble(address, &fetched.logs))
    }

    async fn due_for_refresh(&self, epoch: u64) -> bool {
        let mut state = self.state.lock().await;
        let epoch_advanced = state.last_epoch.map(|last| epoch > last).unwrap_or(true);
        let interval_elapsed = state
            .last_refresh
            .map(|at| at.elapsed() >= self.refresh_interval)
            .unwrap_or(true);
        if epoch_advanced || interval_elapsed {
            state.last_epoch = Some(epoch);
            state.last_refresh = Some(Instant::now());
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl TickSink for HistorySync {
    async fn on_tick(&self, epoch: u64) -> Result<(), ChainError> {
        if !self.due_for_refresh(epoch).await {
            return Ok(());
        }
        // Sequential, registration order. A failed address logs and moves
        // on; the next refresh cycle picks it up again.
        for address in self.watcher.watched_addresses() {
            match self.raw_events_for(address).await {
                Ok(events) => {
                    for (sender, event) in events {
                        self.watcher.deliver(sender, event);
                    }
                }
                Err(e) => {
                    warn!(
                        target: "monitor",
                        address = ?address,
                        error = %e,
                        "History refresh failed for address"
                    );
                }
            }
        }
        Ok(())
    }
}

impl HistorySync {
    async fn raw_events_for(
        &self,
        address: Address,
    ) -> Result<Vec<(Address, BetEvent)>, ChainError> {
        let head = self.reader.latest_block().await?;
        let from = head.saturating_sub(self.window_blocks);
        let filter = bet_filter(self.reader.contract_address(), Some(address));
        let fetcher = LogRangeFetcher::new(&self.reader, self.chunk_size);
        let fetched = fetcher
            .fetch_range(&filter, from, head, FetchMode::SkipFailedChunks)
            .await?;
        Ok(fetched.logs.iter().filter_map(history::parse_event).collect())
    }
}
