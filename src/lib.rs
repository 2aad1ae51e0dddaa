//! # prediction-watch
//!
//! Monitoring client for a fixed-odds prediction contract (recurring
//! rounds, bull/bear bets, reward claims) over contended, rate-limited
//! public RPC endpoints.
//!
//! The crate is organized leaf-first:
//! - [`endpoints`] - endpoint rotation, health tracking, exhaustion backoff
//! - [`throttle`] - minimum inter-request spacing with failure multiplier
//! - [`chain`] - typed contract reads with bounded retry over the pool
//! - [`fetch`] - chunked, sequential, failure-tolerant log range queries
//! - [`dedup`] - at-most-once event key set
//! - [`history`] - raw logs to per-wallet bet/claim history
//! - [`scheduler`] - round-boundary-aware polling cadence
//! - [`watch`] - live subscriptions with dedup-gated delivery
//! - [`monitor`] - the composed session and external API

pub mod chain;
pub mod config;
pub mod contract;
pub mod dedup;
pub mod endpoints;
pub mod errors;
pub mod fetch;
pub mod history;
pub mod monitor;
pub mod scheduler;
pub mod throttle;
pub mod types;
pub mod watch;

pub use chain::{ChainReader, HttpTransport, RpcTransport};
pub use config::Config;
pub use errors::{ChainError, MonitorError};
pub use fetch::FetchMode;
pub use monitor::PredictionMonitor;
pub use types::{BetEvent, BetKind, Round, WalletHistory};
pub use watch::SubscriptionHandle;
