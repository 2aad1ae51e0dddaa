//! # Wallet History Assembly
//!
//! Turns raw event logs into a per-address history of bull bets, bear bets,
//! and claims. Stateless per call: each full resync rebuilds the history
//! from scratch rather than mutating the previous one.
//!
//! No deduplication happens here. The assembler reports what the logs say;
//! deciding whether an event is *new* is the delivery layer's job via
//! [`crate::dedup::EventDeduplicator`].

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Log};
use tracing::trace;

use crate::contract::{format_amount, kind_for_topic};
use crate::types::{BetEvent, BetKind, HistoryEntry, WalletHistory};

/// Parses one raw log into `(sender, event)` against the prediction
/// contract's event signatures. Unparseable logs yield `None` and are
/// dropped by callers.
pub fn parse_event(log: &Log) -> Option<(Address, BetEvent)> {
    let kind = kind_for_topic(log.topics.first()?)?;
    let sender_topic = log.topics.get(1)?;
    let epoch_topic = log.topics.get(2)?;

    let sender = Address::from_slice(&sender_topic.as_bytes()[12..]);
    let epoch = ethers::types::U256::from_big_endian(epoch_topic.as_bytes());
    if epoch > ethers::types::U256::from(u64::MAX) {
        return None;
    }

    let amount = match abi::decode(&[ParamType::Uint(256)], &log.data) {
        Ok(tokens) => match tokens.into_iter().next() {
            Some(Token::Uint(value)) => value,
            _ => return None,
        },
        Err(e) => {
            trace!(target: "history", error = %e, "Dropping log with undecodable amount");
            return None;
        }
    };

    Some((
        sender,
        BetEvent { kind, epoch: epoch.as_u64(), amount: format_amount(amount) },
    ))
}

/// Assembles the history for one address from raw logs, keeping log order
/// within each kind. Logs from other senders are ignored, so a caller may
/// feed an unfiltered contract-wide scan.
pub fn assemble(address: Address, logs: &[Log]) -> WalletHistory {
    let mut history = WalletHistory::new(address);
    for log in logs {
        let Some((sender, event)) = parse_event(log) else {
            continue;
        };
        if sender != address {
            continue;
        }
        let entry = HistoryEntry { epoch: event.epoch, amount: event.amount };
        match event.kind {
            BetKind::Bull => history.bulls.push(entry),
            BetKind::Bear => history.bears.push(entry),
            BetKind::Claim => history.claims.push(entry),
        }
    }
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{BET_BEAR_TOPIC, BET_BULL_TOPIC, CLAIM_TOPIC};
    use ethers::types::{Bytes, H256, U256};

    fn bet_log(topic0: H256, sender: Address, epoch: u64, amount: U256) -> Log {
        let mut amount_bytes = [0u8; 32];
        amount.to_big_endian(&mut amount_bytes);
        Log {
            topics: vec![topic0, H256::from(sender), H256::from_low_u64_be(epoch)],
            data: Bytes::from(amount_bytes.to_vec()),
            ..Default::default()
        }
    }

    fn half_bnb() -> U256 {
        U256::from_dec_str("500000000000000000").unwrap()
    }

    #[test]
    fn parses_bull_bet() {
        let sender = Address::repeat_byte(0xab);
        let log = bet_log(*BET_BULL_TOPIC, sender, 100, half_bnb());
        let (parsed_sender, event) = parse_event(&log).unwrap();
        assert_eq!(parsed_sender, sender);
        assert_eq!(event.kind, BetKind::Bull);
        assert_eq!(event.epoch, 100);
        assert_eq!(event.amount, "0.5");
    }

    #[test]
    fn drops_unknown_topics_and_short_logs() {
        let log = bet_log(H256::zero(), Address::repeat_byte(0x01), 1, half_bnb());
        assert!(parse_event(&log).is_none());

        let truncated = Log { topics: vec![*BET_BULL_TOPIC], ..Default::default() };
        assert!(parse_event(&truncated).is_none());
    }

    #[test]
    fn drops_logs_with_empty_data() {
        let mut log = bet_log(*BET_BULL_TOPIC, Address::repeat_byte(0x01), 1, half_bnb());
        log.data = Bytes::default();
        assert!(parse_event(&log).is_none());
    }

    #[test]
    fn assembles_by_kind_and_ignores_other_senders() {
        let watched = Address::repeat_byte(0xaa);
        let other = Address::repeat_byte(0xbb);
        let logs = vec![
            bet_log(*BET_BULL_TOPIC, watched, 100, half_bnb()),
            bet_log(*BET_BEAR_TOPIC, watched, 101, U256::from_dec_str("1000000000000000000").unwrap()),
            bet_log(*CLAIM_TOPIC, watched, 100, U256::from_dec_str("950000000000000000").unwrap()),
            bet_log(*BET_BULL_TOPIC, other, 100, half_bnb()),
        ];

        let history = assemble(watched, &logs);
        assert_eq!(history.bulls, vec![HistoryEntry { epoch: 100, amount: "0.5".into() }]);
        assert_eq!(history.bears, vec![HistoryEntry { epoch: 101, amount: "1".into() }]);
        assert_eq!(history.claims, vec![HistoryEntry { epoch: 100, amount: "0.95".into() }]);
        assert_eq!(history.total_events(), 3);
    }

    #[test]
    fn history_keeps_log_order_within_kind() {
        let watched = Address::repeat_byte(0xaa);
        let logs: Vec<Log> = [103u64, 101, 102]
            .iter()
            .map(|&epoch| bet_log(*BET_BULL_TOPIC, watched, epoch, half_bnb()))
            .collect();
        let history = assemble(watched, &logs);
        let epochs: Vec<u64> = history.bulls.iter().map(|e| e.epoch).collect();
        assert_eq!(epochs, vec![103, 101, 102]);
    }
}
