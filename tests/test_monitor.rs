//! End-to-end tests over a scripted transport: endpoint failover, retry
//! exhaustion, chunk-skip tolerance, history assembly, and at-most-once
//! delivery across repeated polls.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Filter, FilterBlockOption, Log, H256,
    U256, U64,
};
use ethers::utils::id;

use prediction_watch::chain::{ChainReader, LogStream, RpcTransport};
use prediction_watch::config::{Config, EndpointConfig};
use prediction_watch::contract::BET_BULL_TOPIC;
use prediction_watch::dedup::EventDeduplicator;
use prediction_watch::endpoints::EndpointPool;
use prediction_watch::errors::ChainError;
use prediction_watch::fetch::{FetchMode, LogRangeFetcher};
use prediction_watch::history::parse_event;
use prediction_watch::throttle::Throttler;
use prediction_watch::types::BetKind;
use prediction_watch::watch::BetWatcher;
use prediction_watch::PredictionMonitor;

use tokio_util::sync::CancellationToken;

const EPOCH: u64 = 100;
const HEAD_BLOCK: u64 = 250;

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn watched_address() -> Address {
    Address::from_slice(&[0xab; 20])
}

fn half_bnb() -> U256 {
    U256::from_dec_str("500000000000000000").unwrap()
}

fn bull_log(sender: Address, epoch: u64, amount: U256, block: u64) -> Log {
    let mut amount_bytes = [0u8; 32];
    amount.to_big_endian(&mut amount_bytes);
    Log {
        topics: vec![*BET_BULL_TOPIC, H256::from(sender), H256::from_low_u64_be(epoch)],
        data: Bytes::from(amount_bytes.to_vec()),
        block_number: Some(U64::from(block)),
        ..Default::default()
    }
}

fn filter_range(filter: &Filter) -> (u64, u64) {
    match filter.block_option {
        FilterBlockOption::Range { from_block, to_block } => (
            from_block.and_then(|b| b.as_number()).map(|n| n.as_u64()).unwrap_or(0),
            to_block.and_then(|b| b.as_number()).map(|n| n.as_u64()).unwrap_or(u64::MAX),
        ),
        _ => (0, u64::MAX),
    }
}

/// Transport with scripted behavior per endpoint URL and per block range.
#[derive(Debug, Default)]
struct ScriptedTransport {
    /// Endpoints that always time out.
    dead_urls: HashSet<String>,
    /// Logs "on chain", filtered by the queried block range.
    logs: Vec<Log>,
    /// Block range whose `eth_getLogs` always fails transiently.
    poisoned_range: Option<(u64, u64)>,
    /// When set, `eth_call` returns undecodable bytes.
    malformed_calls: bool,
    call_count: AtomicU32,
    get_logs_count: AtomicU32,
}

impl ScriptedTransport {
    fn round_response() -> Bytes {
        let lock_ts = now_secs() + 120;
        let tokens = vec![
            Token::Uint(U256::from(EPOCH)),
            Token::Uint(U256::from(lock_ts - 300)),
            Token::Uint(U256::from(lock_ts)),
            Token::Uint(U256::from(lock_ts + 300)),
            Token::Int(U256::zero()),
            Token::Int(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Uint(U256::zero()),
            Token::Bool(false),
        ];
        Bytes::from(abi::encode(&tokens))
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn call(
        &self,
        endpoint_url: &str,
        tx: &TypedTransaction,
    ) -> Result<Bytes, ChainError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.dead_urls.contains(endpoint_url) {
            return Err(ChainError::Transient("request timed out".into()));
        }
        if self.malformed_calls {
            return Ok(Bytes::from(vec![0u8; 3]));
        }
        let data = tx.data().cloned().unwrap_or_default();
        if data.len() >= 4 && data[..4] == id("currentEpoch()")[..] {
            Ok(Bytes::from(abi::encode(&[Token::Uint(U256::from(EPOCH))])))
        } else if data.len() >= 4 && data[..4] == id("rounds(uint256)")[..] {
            Ok(Self::round_response())
        } else {
            Err(ChainError::MalformedResponse("unknown selector".into()))
        }
    }

    async fn get_block_number(&self, endpoint_url: &str) -> Result<u64, ChainError> {
        if self.dead_urls.contains(endpoint_url) {
            return Err(ChainError::Transient("request timed out".into()));
        }
        Ok(HEAD_BLOCK)
    }

    async fn get_logs(
        &self,
        endpoint_url: &str,
        filter: &Filter,
    ) -> Result<Vec<Log>, ChainError> {
        self.get_logs_count.fetch_add(1, Ordering::SeqCst);
        if self.dead_urls.contains(endpoint_url) {
            return Err(ChainError::Transient("request timed out".into()));
        }
        let (from, to) = filter_range(filter);
        if let Some((bad_from, bad_to)) = self.poisoned_range {
            if from <= bad_to && to >= bad_from {
                return Err(ChainError::Transient("connection reset".into()));
            }
        }
        Ok(self
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|n| n.as_u64()).unwrap_or(0);
                block >= from && block <= to
            })
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, _filter: &Filter) -> Result<LogStream, ChainError> {
        Err(ChainError::Configuration("no stream in scripted transport".into()))
    }
}

fn test_config(endpoint_count: usize, max_attempts: u32) -> Config {
    let mut config = Config::default();
    config.chain.endpoints = (0..endpoint_count)
        .map(|i| EndpointConfig { url: format!("http://rpc-{}", i), priority: Some(i as u32) })
        .collect();
    config.rpc.max_attempts = max_attempts;
    config.rpc.request_interval_ms = 0;
    config.rpc.backoff_base_ms = 10;
    config.rpc.backoff_cap_ms = 50;
    config
}

struct Harness {
    reader: Arc<ChainReader>,
    pool: Arc<EndpointPool>,
}

fn build_reader(config: &Config, transport: Arc<dyn RpcTransport>) -> Harness {
    let pool = Arc::new(EndpointPool::new(&config.chain.endpoints, &config.rpc));
    let throttler = Arc::new(Throttler::new(&config.rpc));
    let reader = Arc::new(ChainReader::new(
        config,
        transport,
        pool.clone(),
        throttler,
        config.contract_address().unwrap(),
    ));
    Harness { reader, pool }
}

#[tokio::test]
async fn failover_reaches_healthy_endpoint_within_budget() {
    let config = test_config(3, 8);
    let transport = Arc::new(ScriptedTransport {
        dead_urls: ["http://rpc-0", "http://rpc-1"].iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    });
    let harness = build_reader(&config, transport);

    let epoch = harness.reader.current_epoch().await.unwrap();
    assert_eq!(epoch, EPOCH);

    let counts = harness.pool.failure_counts().await;
    assert_eq!(counts[0], ("http://rpc-0".to_string(), 1));
    assert_eq!(counts[1], ("http://rpc-1".to_string(), 1));
    assert_eq!(counts[2], ("http://rpc-2".to_string(), 0));
}

#[tokio::test(start_paused = true)]
async fn exhausting_all_endpoints_is_terminal_for_the_call() {
    let config = test_config(2, 3);
    let transport = Arc::new(ScriptedTransport {
        dead_urls: ["http://rpc-0", "http://rpc-1"].iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    });
    let harness = build_reader(&config, transport);

    match harness.reader.current_epoch().await {
        Err(ChainError::Unavailable { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected Unavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_response_is_fatal_and_never_retried() {
    let config = test_config(3, 8);
    let transport = Arc::new(ScriptedTransport { malformed_calls: true, ..Default::default() });
    let counter = transport.clone();
    let harness = build_reader(&config, transport);

    match harness.reader.current_epoch().await {
        Err(ChainError::MalformedResponse(_)) => {}
        other => panic!("expected MalformedResponse, got {:?}", other),
    }
    assert_eq!(counter.call_count.load(Ordering::SeqCst), 1);
    // No rotation happened either.
    assert!(harness.pool.failure_counts().await.iter().all(|(_, n)| *n == 0));
}

#[tokio::test(start_paused = true)]
async fn poisoned_chunk_is_skipped_and_union_returned() {
    let config = test_config(1, 2);
    let watched = watched_address();
    let transport = Arc::new(ScriptedTransport {
        logs: vec![
            bull_log(watched, 98, half_bnb(), 60),
            bull_log(watched, 99, half_bnb(), 105),
            bull_log(watched, 100, half_bnb(), 240),
        ],
        // The chunk containing block 105 always fails.
        poisoned_range: Some((90, 109)),
        ..Default::default()
    });
    let harness = build_reader(&config, transport);

    let filter = Filter::new();
    let fetcher = LogRangeFetcher::new(&harness.reader, 20);
    let fetched = fetcher
        .fetch_range(&filter, 50, HEAD_BLOCK, FetchMode::SkipFailedChunks)
        .await
        .unwrap();

    assert!(!fetched.is_complete());
    assert_eq!(fetched.skipped, vec![(90, 109)]);
    let epochs: Vec<u64> =
        fetched.logs.iter().filter_map(|l| parse_event(l)).map(|(_, e)| e.epoch).collect();
    assert_eq!(epochs, vec![98, 100]);
}

#[tokio::test(start_paused = true)]
async fn strict_mode_aborts_on_failed_chunk() {
    let config = test_config(1, 2);
    let transport = Arc::new(ScriptedTransport {
        poisoned_range: Some((50, 69)),
        ..Default::default()
    });
    let harness = build_reader(&config, transport);

    let fetcher = LogRangeFetcher::new(&harness.reader, 20);
    let result = fetcher
        .fetch_range(&Filter::new(), 50, HEAD_BLOCK, FetchMode::AllOrNothing)
        .await;
    assert!(matches!(result, Err(ChainError::Unavailable { .. })));
}

#[tokio::test]
async fn duplicate_polls_deliver_exactly_one_callback() {
    let config = test_config(1, 2);
    let watched = watched_address();
    let log = bull_log(watched, 100, half_bnb(), 240);
    let transport = Arc::new(ScriptedTransport::default());
    let harness = build_reader(&config, transport);

    let dedup = Arc::new(EventDeduplicator::new());
    let watcher = BetWatcher::new(harness.reader.clone(), dedup, CancellationToken::new());

    let delivered = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = delivered.clone();
    let _handle = watcher.subscribe(watched, move |event| {
        sink.lock().unwrap().push(event);
    });

    // Two overlapping polls observe the same underlying chain event.
    for _ in 0..2 {
        let (sender, event) = parse_event(&log).unwrap();
        watcher.deliver(sender, event);
    }
    tokio::task::yield_now().await;

    let events = delivered.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, BetKind::Bull);
    assert_eq!(events[0].epoch, 100);
    assert_eq!(events[0].amount, "0.5");
}

#[tokio::test]
async fn unsubscribed_handle_stops_callbacks() {
    let config = test_config(1, 2);
    let watched = watched_address();
    let transport = Arc::new(ScriptedTransport::default());
    let harness = build_reader(&config, transport);

    let dedup = Arc::new(EventDeduplicator::new());
    let watcher = BetWatcher::new(harness.reader.clone(), dedup, CancellationToken::new());

    let count = Arc::new(AtomicU32::new(0));
    let sink = count.clone();
    let handle = watcher.subscribe(watched, move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(watcher.subscription_count(), 1);

    handle.unsubscribe();
    assert_eq!(watcher.subscription_count(), 0);

    let (sender, event) =
        parse_event(&bull_log(watched, 101, half_bnb(), 241)).unwrap();
    watcher.deliver(sender, event);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn monitor_assembles_wallet_history_over_window() {
    let mut config = test_config(1, 3);
    config.fetch.blocks_per_chunk = 50;
    config.fetch.history_window_blocks = 200;
    let watched = watched_address();
    let other = Address::from_slice(&[0xcd; 20]);
    let transport = Arc::new(ScriptedTransport {
        logs: vec![
            bull_log(watched, 99, half_bnb(), 120),
            bull_log(watched, 100, half_bnb(), 230),
            bull_log(other, 100, half_bnb(), 231),
            // Outside the 200-block window from head 250.
            bull_log(watched, 42, half_bnb(), 10),
        ],
        ..Default::default()
    });

    let monitor = PredictionMonitor::new(config, transport).unwrap();
    let history = monitor.wallet_history(watched).await.unwrap();

    let epochs: Vec<u64> = history.bulls.iter().map(|e| e.epoch).collect();
    assert_eq!(epochs, vec![99, 100]);
    assert!(history.bears.is_empty());
    assert!(history.claims.is_empty());
    assert_eq!(history.bulls[0].amount, "0.5");
}

#[tokio::test]
async fn monitor_exposes_round_timing() {
    let config = test_config(1, 3);
    let transport = Arc::new(ScriptedTransport::default());
    let monitor = PredictionMonitor::new(config, transport).unwrap();

    assert_eq!(monitor.current_epoch().await.unwrap(), EPOCH);
    let round = monitor.round_info(EPOCH).await.unwrap();
    assert_eq!(round.epoch, EPOCH);
    assert!(round.lock_timestamp > round.start_timestamp);

    let remaining = monitor.time_until_next_round().await.unwrap();
    assert!(remaining > 110_000 && remaining <= 120_000);
}
