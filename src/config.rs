//! # Configuration
//!
//! Settings are loaded from a single JSON file and grouped by concern:
//! chain/contract identity, RPC resilience knobs, log-fetch tuning, and
//! scheduler cadence. Every knob has a default matching the public-BSC
//! deployment profile the client was built against, so an empty `{}` config
//! is a working config.

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::MonitorError;

/// PancakeSwap-style prediction contract on BSC mainnet.
pub const DEFAULT_PREDICTION_ADDRESS: &str = "0x18B2A687610328590Bc8F2e5fEdDe3b582A49cdA";

/// Public BSC dataseed endpoints. Contended and rate-limited, which is the
/// whole reason the resilience layer exists.
pub const DEFAULT_RPC_ENDPOINTS: &[&str] = &[
    "https://bsc-dataseed.binance.org",
    "https://bsc-dataseed1.binance.org",
    "https://bsc-dataseed2.binance.org",
    "https://bsc-dataseed3.binance.org",
    "https://bsc-dataseed4.binance.org",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainSettings,
    #[serde(default)]
    pub rpc: RpcSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

impl Config {
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self, MonitorError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            MonitorError::Configuration(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| MonitorError::Configuration(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.chain.endpoints.is_empty() {
            return Err(MonitorError::Configuration(
                "at least one RPC endpoint is required".to_string(),
            ));
        }
        if self.fetch.blocks_per_chunk == 0 {
            return Err(MonitorError::Configuration(
                "blocks_per_chunk must be greater than zero".to_string(),
            ));
        }
        if self.rpc.max_attempts == 0 {
            return Err(MonitorError::Configuration(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        self.contract_address()?;
        Ok(())
    }

    pub fn contract_address(&self) -> Result<Address, MonitorError> {
        Address::from_str(&self.chain.contract_address).map_err(|e| {
            MonitorError::Configuration(format!(
                "invalid contract address {}: {}",
                self.chain.contract_address, e
            ))
        })
    }
}

/// Chain and contract identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    #[serde(default = "default_chain_name")]
    pub chain_name: String,
    #[serde(default = "default_contract_address")]
    pub contract_address: String,
    /// HTTP endpoints tried in rotation for reads and log queries.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,
    /// WebSocket endpoint for the live event stream. Optional: without it
    /// only the polling path delivers events.
    #[serde(default)]
    pub ws_url: Option<String>,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            chain_name: default_chain_name(),
            contract_address: default_contract_address(),
            endpoints: default_endpoints(),
            ws_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    /// Lower number = tried earlier in the rotation.
    #[serde(default)]
    pub priority: Option<u32>,
}

/// Resilience knobs shared by every outgoing RPC call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Attempt bound for one logical call across endpoint rotation.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Minimum spacing between any two outgoing requests.
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
    /// Cap on the throttle's failure multiplier.
    #[serde(default = "default_throttle_max_multiplier")]
    pub throttle_max_multiplier: u32,
    /// Base for the pool's full-exhaustion backoff: min(base * 2^n, cap).
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Hard timeout on a single transport call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            request_interval_ms: default_request_interval_ms(),
            throttle_max_multiplier: default_throttle_max_multiplier(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RpcSettings {
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Historical log retrieval tuning. Smaller chunks trade latency for
/// reliability on the public endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    #[serde(default = "default_blocks_per_chunk")]
    pub blocks_per_chunk: u64,
    /// How many blocks back from the chain head a history scan covers.
    #[serde(default = "default_history_window_blocks")]
    pub history_window_blocks: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            blocks_per_chunk: default_blocks_per_chunk(),
            history_window_blocks: default_history_window_blocks(),
        }
    }
}

/// Polling cadence around round boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Tick delay when the lock boundary is imminent.
    #[serde(default = "default_intensive_interval_ms")]
    pub intensive_interval_ms: u64,
    /// Tick delay otherwise.
    #[serde(default = "default_relaxed_interval_ms")]
    pub relaxed_interval_ms: u64,
    /// How close (seconds) the lock boundary must be to count as imminent.
    #[serde(default = "default_intensive_threshold_secs")]
    pub intensive_threshold_secs: u64,
    /// Delay before retrying after a failed tick. Deliberately short; the
    /// pool's own backoff handles sustained outages.
    #[serde(default = "default_error_retry_ms")]
    pub error_retry_ms: u64,
    /// Full history re-scan interval when the epoch is not advancing.
    #[serde(default = "default_history_refresh_secs")]
    pub history_refresh_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            intensive_interval_ms: default_intensive_interval_ms(),
            relaxed_interval_ms: default_relaxed_interval_ms(),
            intensive_threshold_secs: default_intensive_threshold_secs(),
            error_retry_ms: default_error_retry_ms(),
            history_refresh_secs: default_history_refresh_secs(),
        }
    }
}

impl SchedulerSettings {
    pub fn intensive_interval(&self) -> Duration {
        Duration::from_millis(self.intensive_interval_ms)
    }

    pub fn relaxed_interval(&self) -> Duration {
        Duration::from_millis(self.relaxed_interval_ms)
    }

    pub fn error_retry(&self) -> Duration {
        Duration::from_millis(self.error_retry_ms)
    }
}

fn default_chain_name() -> String {
    "bsc".to_string()
}

fn default_contract_address() -> String {
    DEFAULT_PREDICTION_ADDRESS.to_string()
}

fn default_endpoints() -> Vec<EndpointConfig> {
    DEFAULT_RPC_ENDPOINTS
        .iter()
        .enumerate()
        .map(|(i, url)| EndpointConfig { url: url.to_string(), priority: Some(i as u32) })
        .collect()
}

fn default_max_attempts() -> u32 {
    8
}

fn default_request_interval_ms() -> u64 {
    3_000
}

fn default_throttle_max_multiplier() -> u32 {
    8
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_backoff_cap_ms() -> u64 {
    40_000
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_blocks_per_chunk() -> u64 {
    20
}

fn default_history_window_blocks() -> u64 {
    200
}

fn default_intensive_interval_ms() -> u64 {
    1_000
}

fn default_relaxed_interval_ms() -> u64 {
    3_000
}

fn default_intensive_threshold_secs() -> u64 {
    30
}

fn default_error_retry_ms() -> u64 {
    3_000
}

fn default_history_refresh_secs() -> u64 {
    300
}
