//! # Centralized Error Handling
//!
//! Typed, hierarchical errors for the monitoring client. The split that
//! matters operationally is retryable vs. fatal: transient network trouble
//! and rate limiting are recovered locally through endpoint rotation and
//! throttle backoff, while a malformed response or a bad configuration is
//! surfaced immediately without burning retry budget on it.

use thiserror::Error;

/// Errors produced by chain access (transport, retry loop, decoding).
#[derive(Error, Debug)]
pub enum ChainError {
    /// Timeout, connection reset, endpoint overloaded. Recovered via
    /// endpoint rotation; never surfaced unless the retry budget runs out.
    #[error("transient network error: {0}")]
    Transient(String),

    /// Endpoint asked us to slow down. Retryable, but forces a longer
    /// throttle multiplier than a plain transient failure.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Every endpoint was exhausted past the retry budget for one call.
    #[error("chain unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    /// Response did not decode against the expected contract ABI. Not
    /// retried; a malformed response rarely fixes itself.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ChainError {
    /// Whether the error is eligible for endpoint rotation and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChainError::Transient(_) | ChainError::RateLimited(_))
    }
}

/// Top-level error for the monitoring session.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("monitor shut down")]
    Shutdown,
}
