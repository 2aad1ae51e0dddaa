//! # Request Throttler
//!
//! Serializes outgoing RPC traffic so that at least `base_interval` elapses
//! between any two granted turns. Consecutive failures stretch the effective
//! interval exponentially (capped); the first success snaps it back to the
//! base. This is independent of the endpoint pool's exhaustion backoff: when
//! both are degraded the waits stack, which is exactly what a struggling
//! public endpoint needs from us.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

use crate::config::RpcSettings;

/// Extra multiplier step applied when the failure was an explicit
/// rate-limit response rather than a generic transient error.
const RATE_LIMIT_PENALTY: u32 = 2;

#[derive(Debug)]
struct ThrottleState {
    last_turn: Option<Instant>,
    multiplier: u32,
}

#[derive(Debug)]
pub struct Throttler {
    inner: Mutex<ThrottleState>,
    base_interval: Duration,
    max_multiplier: u32,
}

impl Throttler {
    pub fn new(settings: &RpcSettings) -> Self {
        Self {
            inner: Mutex::new(ThrottleState { last_turn: None, multiplier: 1 }),
            base_interval: settings.request_interval(),
            max_multiplier: settings.throttle_max_multiplier.max(1),
        }
    }

    /// Suspends until the effective inter-request interval has elapsed since
    /// the last granted turn, then claims this turn.
    pub async fn await_turn(&self) {
        let deadline = {
            let mut state = self.inner.lock().await;
            let interval = self.base_interval.saturating_mul(state.multiplier);
            let deadline = match state.last_turn {
                Some(last) => last + interval,
                None => Instant::now(),
            };
            // Claim the turn up front; concurrent callers queue behind it.
            state.last_turn = Some(deadline.max(Instant::now()));
            deadline
        };
        let now = Instant::now();
        if deadline > now {
            trace!(
                target: "throttler",
                wait_ms = (deadline - now).as_millis() as u64,
                "Waiting for request turn"
            );
            sleep_until(deadline).await;
        }
    }

    /// Doubles the effective interval, up to the configured cap.
    pub async fn note_failure(&self) {
        let mut state = self.inner.lock().await;
        state.multiplier = (state.multiplier.saturating_mul(2)).min(self.max_multiplier);
    }

    /// Rate-limit responses push the interval harder than plain failures.
    pub async fn note_rate_limited(&self) {
        let mut state = self.inner.lock().await;
        state.multiplier = state
            .multiplier
            .saturating_mul(2 * RATE_LIMIT_PENALTY)
            .min(self.max_multiplier);
    }

    /// A successful call resets the failure multiplier to 1.
    pub async fn note_success(&self) {
        let mut state = self.inner.lock().await;
        state.multiplier = 1;
    }

    pub async fn current_multiplier(&self) -> u32 {
        self.inner.lock().await.multiplier
    }
}
