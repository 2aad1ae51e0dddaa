//! # Bet Watcher
//!
//! The subscription API: register an address, get a callback for each new
//! bet or claim, exactly once per `(address, epoch, kind)`.
//!
//! Each subscription runs a live-event task over the WebSocket log stream,
//! filtered server-side to the contract and the address, reconnecting with
//! jittered exponential backoff when the stream drops. Every event, whether
//! it arrived on the live stream or through the scheduler's periodic
//! re-poll, funnels through [`BetWatcher::deliver`], where the shared
//! deduplicator decides if it is new before any callback fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ethers::types::Address;
use futures::StreamExt;
use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::ChainReader;
use crate::contract::bet_filter;
use crate::dedup::EventDeduplicator;
use crate::errors::ChainError;
use crate::history::parse_event;
use crate::types::{BetEvent, DedupKey};

pub type BetCallback = Arc<dyn Fn(BetEvent) + Send + Sync>;

const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
const RECONNECT_JITTER_FACTOR: f64 = 0.2;

/// Exponential reconnect delay with randomized jitter so parallel
/// subscriptions do not hammer the endpoint in lockstep.
fn backoff_with_jitter(attempts: u32, base: Duration, max: Duration, jitter: f64) -> Duration {
    let exp = attempts.saturating_sub(1).min(8);
    let mut delay = base.saturating_mul(2u32.saturating_pow(exp));
    delay = delay.min(max);
    let jitter_ms = (delay.as_millis() as f64 * jitter * rand::thread_rng().gen::<f64>()) as u64;
    delay + Duration::from_millis(jitter_ms)
}

struct Subscription {
    address: Address,
    callback: BetCallback,
    token: CancellationToken,
}

/// Detaches the subscription when invoked (or dropped). Best-effort cutoff:
/// the live task is signalled and the registry entry removed; an event
/// already inside `deliver` may still complete.
pub struct SubscriptionHandle {
    id: u64,
    registry: Arc<DashMap<u64, Subscription>>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    fn detach(&self) {
        if let Some((_, sub)) = self.registry.remove(&self.id) {
            sub.token.cancel();
            debug!(target: "bet_watcher", id = self.id, address = ?sub.address, "Unsubscribed");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.detach();
    }
}

pub struct BetWatcher {
    reader: Arc<ChainReader>,
    dedup: Arc<EventDeduplicator>,
    registry: Arc<DashMap<u64, Subscription>>,
    next_id: AtomicU64,
    token: CancellationToken,
}

impl BetWatcher {
    pub fn new(
        reader: Arc<ChainReader>,
        dedup: Arc<EventDeduplicator>,
        token: CancellationToken,
    ) -> Self {
        Self {
            reader,
            dedup,
            registry: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            token,
        }
    }

    /// Registers a callback for new bets and claims by `address` and starts
    /// the live-event task for it.
    pub fn subscribe(
        &self,
        address: Address,
        callback: impl Fn(BetEvent) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sub_token = self.token.child_token();
        self.registry.insert(
            id,
            Subscription { address, callback: Arc::new(callback), token: sub_token.clone() },
        );
        info!(target: "bet_watcher", id, address = ?address, "Subscribed to new bets");

        let task = LiveStreamTask {
            reader: self.reader.clone(),
            dedup: self.dedup.clone(),
            registry: self.registry.clone(),
            address,
            token: sub_token,
        };
        tokio::spawn(task.run());

        SubscriptionHandle { id, registry: self.registry.clone() }
    }

    /// Single delivery funnel for both the live stream and the re-poll
    /// path. Fires each matching callback at most once per event key.
    pub fn deliver(&self, sender: Address, event: BetEvent) {
        deliver_via(&self.dedup, &self.registry, sender, event);
    }

    /// Distinct watched addresses in registration order, for the
    /// scheduler's sequential history refresh.
    pub fn watched_addresses(&self) -> Vec<Address> {
        let mut entries: Vec<(u64, Address)> =
            self.registry.iter().map(|e| (*e.key(), e.value().address)).collect();
        entries.sort_by_key(|(id, _)| *id);
        let mut seen = Vec::new();
        for (_, address) in entries {
            if !seen.contains(&address) {
                seen.push(address);
            }
        }
        seen
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }
}

fn deliver_via(
    dedup: &EventDeduplicator,
    registry: &DashMap<u64, Subscription>,
    sender: Address,
    event: BetEvent,
) {
    let key = DedupKey::new(sender, event.epoch, event.kind);
    if !dedup.first_seen(key) {
        return;
    }
    debug!(
        target: "bet_watcher",
        address = ?sender,
        epoch = event.epoch,
        kind = %event.kind,
        amount = %event.amount,
        "Delivering new event"
    );
    // Collect first so a callback that subscribes or unsubscribes does not
    // re-enter the registry mid-iteration.
    let callbacks: Vec<BetCallback> = registry
        .iter()
        .filter(|entry| entry.value().address == sender && !entry.value().token.is_cancelled())
        .map(|entry| entry.value().callback.clone())
        .collect();
    for callback in callbacks {
        callback(event.clone());
    }
}

/// Owns one live WebSocket subscription and its reconnect loop.
struct LiveStreamTask {
    reader: Arc<ChainReader>,
    dedup: Arc<EventDeduplicator>,
    registry: Arc<DashMap<u64, Subscription>>,
    address: Address,
    token: CancellationToken,
}

impl LiveStreamTask {
    async fn run(self) {
        let filter = bet_filter(self.reader.contract_address(), Some(self.address));
        let mut attempts: u32 = 0;

        loop {
            if self.token.is_cancelled() {
                return;
            }

            match self.reader.subscribe_logs(&filter).await {
                Ok(mut stream) => {
                    attempts = 0;
                    loop {
                        tokio::select! {
                            _ = self.token.cancelled() => return,
                            log = stream.next() => match log {
                                Some(log) => {
                                    if let Some((sender, event)) = parse_event(&log) {
                                        deliver_via(&self.dedup, &self.registry, sender, event);
                                    }
                                }
                                None => break,
                            }
                        }
                    }
                    warn!(
                        target: "bet_watcher",
                        address = ?self.address,
                        "Live event stream ended; reconnecting"
                    );
                }
                Err(ChainError::Configuration(reason)) => {
                    // No stream source configured: the polling path still
                    // delivers, so this subscription goes passive.
                    debug!(
                        target: "bet_watcher",
                        address = ?self.address,
                        %reason,
                        "Live stream unavailable; relying on polling deliveries"
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        target: "bet_watcher",
                        address = ?self.address,
                        error = %e,
                        "Failed to open live event stream"
                    );
                }
            }

            attempts = attempts.saturating_add(1);
            let delay = backoff_with_jitter(
                attempts,
                RECONNECT_BASE_DELAY,
                RECONNECT_MAX_DELAY,
                RECONNECT_JITTER_FACTOR,
            );
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = sleep(delay) => {}
            }
        }
    }
}
