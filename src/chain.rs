//! # Chain Reader
//!
//! Thin typed accessor over the endpoint pool: `current_epoch`,
//! `round_info`, `latest_block`, and raw `get_logs`. Every call takes a
//! throttle turn, acquires an endpoint, and on a retry-eligible failure
//! rotates to the next endpoint up to a bounded attempt count. Fatal errors
//! (malformed responses, bad configuration) propagate immediately without
//! rotating; retrying those rarely helps.
//!
//! [`RpcTransport`] is the injectable seam between the retry machinery and
//! the wire. Production uses [`HttpTransport`] (one lazily created
//! `ethers` provider per endpoint URL plus an optional WebSocket stream);
//! tests drive the same machinery with scripted transports.

use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::providers::{Http, Middleware, Provider, Ws};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Filter, Log, TransactionRequest,
};
use futures::{Stream, StreamExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::Config;
use crate::contract;
use crate::endpoints::EndpointPool;
use crate::errors::ChainError;
use crate::throttle::Throttler;
use crate::types::Round;

/// Live event stream handed out by [`RpcTransport::subscribe_logs`].
pub type LogStream = Pin<Box<dyn Stream<Item = Log> + Send>>;

/// Error-message fragments that identify a rate-limit response.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "too many requests",
    "exceeded",
    "429",
    "-32005",
    "quorum",
];

/// Error-message fragments that identify a plain transient network failure.
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "temporarily unavailable",
    "502",
    "503",
];

/// Maps a provider error message onto the retryable/fatal taxonomy.
pub fn classify_provider_error(message: &str) -> ChainError {
    let lower = message.to_lowercase();
    if RATE_LIMIT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ChainError::RateLimited(message.to_string())
    } else if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ChainError::Transient(message.to_string())
    } else if lower.contains("deserialization") || lower.contains("invalid type") {
        ChainError::MalformedResponse(message.to_string())
    } else {
        // Unknown provider errors are treated as transient: on public
        // endpoints the long tail is overwhelmingly infrastructure noise.
        ChainError::Transient(message.to_string())
    }
}

/// Seam between the retry machinery and the wire.
#[async_trait]
pub trait RpcTransport: Send + Sync + Debug {
    async fn call(&self, endpoint_url: &str, tx: &TypedTransaction) -> Result<Bytes, ChainError>;
    async fn get_block_number(&self, endpoint_url: &str) -> Result<u64, ChainError>;
    async fn get_logs(&self, endpoint_url: &str, filter: &Filter) -> Result<Vec<Log>, ChainError>;
    /// Opens a live log subscription. Independent of the HTTP endpoint
    /// rotation; returns `Configuration` when no stream source exists.
    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogStream, ChainError>;
}

/// Production transport: JSON-RPC over HTTP per endpoint, WebSocket for the
/// live stream.
#[derive(Debug)]
pub struct HttpTransport {
    providers: DashMap<String, Arc<Provider<Http>>>,
    ws_url: Option<String>,
}

impl HttpTransport {
    pub fn new(ws_url: Option<String>) -> Self {
        Self { providers: DashMap::new(), ws_url }
    }

    fn provider_for(&self, url: &str) -> Result<Arc<Provider<Http>>, ChainError> {
        if let Some(existing) = self.providers.get(url) {
            return Ok(existing.clone());
        }
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| ChainError::Configuration(format!("invalid endpoint url {}: {}", url, e)))?;
        let provider = Arc::new(provider);
        self.providers.insert(url.to_string(), provider.clone());
        Ok(provider)
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, endpoint_url: &str, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        let provider = self.provider_for(endpoint_url)?;
        provider
            .call(tx, None)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))
    }

    async fn get_block_number(&self, endpoint_url: &str) -> Result<u64, ChainError> {
        let provider = self.provider_for(endpoint_url)?;
        provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| classify_provider_error(&e.to_string()))
    }

    async fn get_logs(&self, endpoint_url: &str, filter: &Filter) -> Result<Vec<Log>, ChainError> {
        let provider = self.provider_for(endpoint_url)?;
        provider
            .get_logs(filter)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))
    }

    async fn subscribe_logs(&self, filter: &Filter) -> Result<LogStream, ChainError> {
        let ws_url = self.ws_url.as_ref().ok_or_else(|| {
            ChainError::Configuration("no WebSocket endpoint configured for live events".into())
        })?;
        let ws = Provider::<Ws>::connect(ws_url)
            .await
            .map_err(|e| classify_provider_error(&e.to_string()))?;
        // The subscription stream borrows its provider, so a forwarding task
        // owns both and the caller gets the receiving end. A subscription
        // error after connect surfaces as an immediately ended stream, which
        // the watcher's reconnect loop already handles.
        let filter = filter.clone();
        let (tx, rx) = futures::channel::mpsc::unbounded();
        tokio::spawn(async move {
            let mut stream = match ws.subscribe_logs(&filter).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(target: "transport", error = %e, "Log subscription failed");
                    return;
                }
            };
            while let Some(log) = stream.next().await {
                if tx.unbounded_send(log).is_err() {
                    break;
                }
            }
        });
        Ok(Box::pin(rx))
    }
}

/// Typed contract reads with rotation, throttling, and a bounded retry
/// budget per call.
#[derive(Debug)]
pub struct ChainReader {
    transport: Arc<dyn RpcTransport>,
    pool: Arc<EndpointPool>,
    throttler: Arc<Throttler>,
    contract_address: Address,
    max_attempts: u32,
    call_timeout: std::time::Duration,
}

impl ChainReader {
    pub fn new(
        config: &Config,
        transport: Arc<dyn RpcTransport>,
        pool: Arc<EndpointPool>,
        throttler: Arc<Throttler>,
        contract_address: Address,
    ) -> Self {
        Self {
            transport,
            pool,
            throttler,
            contract_address,
            max_attempts: config.rpc.max_attempts,
            call_timeout: config.rpc.call_timeout(),
        }
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    /// Retry loop shared by every read: throttle, acquire, execute, report.
    async fn with_retry<T, F, Fut>(&self, method: &str, op: F) -> Result<T, ChainError>
    where
        F: Fn(Arc<dyn RpcTransport>, String) -> Fut,
        Fut: std::future::Future<Output = Result<T, ChainError>> + Send,
    {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            self.throttler.await_turn().await;
            let endpoint = self.pool.acquire().await;
            debug!(
                target: "chain_reader",
                method,
                attempt,
                endpoint = %endpoint.url,
                "Executing RPC call"
            );

            let outcome = match timeout(
                self.call_timeout,
                op(self.transport.clone(), endpoint.url.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ChainError::Transient(format!(
                    "call timed out after {:?}",
                    self.call_timeout
                ))),
            };

            match outcome {
                Ok(value) => {
                    self.pool.report_success(&endpoint).await;
                    self.throttler.note_success().await;
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        target: "chain_reader",
                        method,
                        attempt,
                        endpoint = %endpoint.url,
                        error = %e,
                        "Retry-eligible RPC failure; rotating endpoint"
                    );
                    self.pool.report_failure(&endpoint).await;
                    if matches!(e, ChainError::RateLimited(_)) {
                        self.throttler.note_rate_limited().await;
                    } else {
                        self.throttler.note_failure().await;
                    }
                    last_error = e.to_string();
                }
                Err(e) => {
                    // Fatal for this call: no rotation, no retry.
                    return Err(e);
                }
            }
        }
        Err(ChainError::Unavailable { attempts: self.max_attempts, last_error })
    }

    /// Reads the contract's current epoch counter.
    pub async fn current_epoch(&self) -> Result<u64, ChainError> {
        let tx = self.read_tx(contract::current_epoch_calldata());
        self.with_retry("currentEpoch", |transport, url| {
            let tx = tx.clone();
            async move {
                let data = transport.call(&url, &tx).await?;
                contract::decode_current_epoch(&data)
            }
        })
        .await
    }

    /// Reads the full round struct for one epoch.
    pub async fn round_info(&self, epoch: u64) -> Result<Round, ChainError> {
        let tx = self.read_tx(contract::rounds_calldata(epoch));
        self.with_retry("rounds", |transport, url| {
            let tx = tx.clone();
            async move {
                let data = transport.call(&url, &tx).await?;
                contract::decode_round(&data)
            }
        })
        .await
    }

    /// Current chain head block number.
    pub async fn latest_block(&self) -> Result<u64, ChainError> {
        self.with_retry("blockNumber", |transport, url| async move {
            transport.get_block_number(&url).await
        })
        .await
    }

    /// Raw log query over an explicit block range.
    pub async fn get_logs(
        &self,
        filter: &Filter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let ranged = filter.clone().from_block(from_block).to_block(to_block);
        self.with_retry("getLogs", |transport, url| {
            let filter = ranged.clone();
            async move { transport.get_logs(&url, &filter).await }
        })
        .await
    }

    /// Opens the live log stream. Not routed through the pool; the stream
    /// source is a dedicated WebSocket endpoint.
    pub async fn subscribe_logs(&self, filter: &Filter) -> Result<LogStream, ChainError> {
        self.transport.subscribe_logs(filter).await
    }

    fn read_tx(&self, data: Bytes) -> TypedTransaction {
        TransactionRequest::new().to(self.contract_address).data(data).into()
    }
}
