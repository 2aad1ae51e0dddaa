//! # RPC Endpoint Pool
//!
//! Rotation and health tracking for the set of public RPC endpoints. The
//! pool is an explicitly constructed instance passed by reference to
//! whichever component composes the client; there is deliberately no global
//! singleton, so tests can run independent pools side by side.
//!
//! Rotation policy: endpoints are tried in priority order; a retry-eligible
//! failure marks the endpoint as burned for the current cycle and advances
//! the cursor. When every endpoint has burned within one cycle the pool
//! performs a full reset of the failure flags and counters and waits
//! `min(base * 2^n, cap)` before handing out the next endpoint, where `n`
//! counts consecutive full-cycle exhaustions. Any success resets `n`.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{EndpointConfig, RpcSettings};

/// Handle to one pool slot, returned by [`EndpointPool::acquire`] and passed
/// back to `report_success` / `report_failure`.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    index: usize,
}

#[derive(Debug)]
struct EndpointState {
    url: String,
    consecutive_failures: u32,
    last_used_at: Option<Instant>,
    failed_this_cycle: bool,
}

#[derive(Debug)]
struct PoolState {
    endpoints: Vec<EndpointState>,
    cursor: usize,
    exhaustions: u32,
}

#[derive(Debug)]
pub struct EndpointPool {
    inner: Mutex<PoolState>,
    backoff_base: Duration,
    backoff_cap: Duration,
}

/// Exhaustion backoff: `min(base * 2^n, cap)`. Pure so the formula is
/// testable without a pool.
pub fn backoff_delay(base: Duration, cap: Duration, exhaustions: u32) -> Duration {
    let exp = exhaustions.min(16);
    base.saturating_mul(2u32.saturating_pow(exp)).min(cap)
}

impl EndpointPool {
    pub fn new(configs: &[EndpointConfig], settings: &RpcSettings) -> Self {
        let mut ordered: Vec<&EndpointConfig> = configs.iter().collect();
        ordered.sort_by_key(|ep| ep.priority.unwrap_or(u32::MAX));
        let endpoints = ordered
            .into_iter()
            .map(|ep| EndpointState {
                url: ep.url.clone(),
                consecutive_failures: 0,
                last_used_at: None,
                failed_this_cycle: false,
            })
            .collect();
        Self {
            inner: Mutex::new(PoolState { endpoints, cursor: 0, exhaustions: 0 }),
            backoff_base: settings.backoff_base(),
            backoff_cap: settings.backoff_cap(),
        }
    }

    /// Hands out the next endpoint not yet burned in the current cycle.
    ///
    /// Suspends through the exhaustion backoff when the whole pool has
    /// burned; always returns eventually.
    pub async fn acquire(&self) -> Endpoint {
        loop {
            let wait = {
                let mut state = self.inner.lock().await;
                if let Some(index) = Self::next_available(&state) {
                    state.cursor = index;
                    let slot = &mut state.endpoints[index];
                    slot.last_used_at = Some(Instant::now());
                    return Endpoint { url: slot.url.clone(), index };
                }

                // Full cycle exhausted: reset everything and back off.
                let wait = backoff_delay(self.backoff_base, self.backoff_cap, state.exhaustions);
                state.exhaustions = state.exhaustions.saturating_add(1);
                for slot in &mut state.endpoints {
                    slot.consecutive_failures = 0;
                    slot.failed_this_cycle = false;
                }
                state.cursor = 0;
                warn!(
                    target: "endpoint_pool",
                    exhaustions = state.exhaustions,
                    wait_ms = wait.as_millis() as u64,
                    "All endpoints failed this cycle; resetting pool and backing off"
                );
                wait
            };
            sleep(wait).await;
        }
    }

    fn next_available(state: &PoolState) -> Option<usize> {
        let len = state.endpoints.len();
        (0..len)
            .map(|offset| (state.cursor + offset) % len)
            .find(|&idx| !state.endpoints[idx].failed_this_cycle)
    }

    /// Records a retry-eligible failure and advances rotation past this
    /// endpoint for the rest of the cycle.
    pub async fn report_failure(&self, endpoint: &Endpoint) {
        let mut state = self.inner.lock().await;
        if let Some(slot) = state.endpoints.get_mut(endpoint.index) {
            slot.consecutive_failures = slot.consecutive_failures.saturating_add(1);
            slot.failed_this_cycle = true;
            debug!(
                target: "endpoint_pool",
                url = %slot.url,
                consecutive_failures = slot.consecutive_failures,
                idle_ms = slot.last_used_at.map(|at| at.elapsed().as_millis() as u64),
                "Endpoint failed; rotating"
            );
        }
        let len = state.endpoints.len();
        state.cursor = (endpoint.index + 1) % len;
    }

    /// Records a success: clears this endpoint's failure counter and resets
    /// the pool-wide exhaustion counter.
    pub async fn report_success(&self, endpoint: &Endpoint) {
        let mut state = self.inner.lock().await;
        if let Some(slot) = state.endpoints.get_mut(endpoint.index) {
            slot.consecutive_failures = 0;
            slot.failed_this_cycle = false;
        }
        state.exhaustions = 0;
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.endpoints.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Current consecutive-failure count per endpoint, in rotation order.
    pub async fn failure_counts(&self) -> Vec<(String, u32)> {
        let state = self.inner.lock().await;
        state
            .endpoints
            .iter()
            .map(|slot| (slot.url.clone(), slot.consecutive_failures))
            .collect()
    }

    pub async fn exhaustion_count(&self) -> u32 {
        self.inner.lock().await.exhaustions
    }
}
