//! # Prediction Contract Surface
//!
//! Selectors, event topics, and ABI encode/decode helpers for the fixed-odds
//! prediction contract. The contract dictates the wire format: method names,
//! argument order, and the 18-decimal fixed-point amount scaling are all
//! fixed upstream, so everything here is hand-encoded against those exact
//! signatures rather than generated.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Filter, H256, I256, U256, ValueOrArray};
use ethers::utils::{format_units, id, keccak256, parse_units, ParseUnits};
use once_cell::sync::Lazy;

use crate::errors::ChainError;
use crate::types::{BetKind, Round};

pub static BET_BULL_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("BetBull(address,uint256,uint256)")));
pub static BET_BEAR_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("BetBear(address,uint256,uint256)")));
pub static CLAIM_TOPIC: Lazy<H256> =
    Lazy::new(|| H256::from(keccak256("Claim(address,uint256,uint256)")));

/// Native token decimals of the chain's fixed-point amount representation.
const AMOUNT_DECIMALS: u32 = 18;

pub fn kind_for_topic(topic: &H256) -> Option<BetKind> {
    if topic == &*BET_BULL_TOPIC {
        Some(BetKind::Bull)
    } else if topic == &*BET_BEAR_TOPIC {
        Some(BetKind::Bear)
    } else if topic == &*CLAIM_TOPIC {
        Some(BetKind::Claim)
    } else {
        None
    }
}

/// Calldata for `currentEpoch()`.
pub fn current_epoch_calldata() -> Bytes {
    Bytes::from(id("currentEpoch()").to_vec())
}

pub fn decode_current_epoch(data: &[u8]) -> Result<u64, ChainError> {
    let tokens = abi::decode(&[ParamType::Uint(256)], data).map_err(|e| {
        ChainError::MalformedResponse(format!("currentEpoch() decode failed: {}", e))
    })?;
    match tokens.first() {
        Some(Token::Uint(value)) => Ok(value.as_u64()),
        _ => Err(ChainError::MalformedResponse(
            "currentEpoch() returned unexpected token".to_string(),
        )),
    }
}

/// Calldata for `rounds(uint256)`.
pub fn rounds_calldata(epoch: u64) -> Bytes {
    let mut data = id("rounds(uint256)").to_vec();
    data.extend_from_slice(&abi::encode(&[Token::Uint(U256::from(epoch))]));
    Bytes::from(data)
}

/// Decodes the 14-field `rounds(uint256)` return struct into a [`Round`].
pub fn decode_round(data: &[u8]) -> Result<Round, ChainError> {
    let params = [
        ParamType::Uint(256), // epoch
        ParamType::Uint(256), // startTimestamp
        ParamType::Uint(256), // lockTimestamp
        ParamType::Uint(256), // closeTimestamp
        ParamType::Int(256),  // lockPrice
        ParamType::Int(256),  // closePrice
        ParamType::Uint(256), // lockOracleId
        ParamType::Uint(256), // closeOracleId
        ParamType::Uint(256), // totalAmount
        ParamType::Uint(256), // bullAmount
        ParamType::Uint(256), // bearAmount
        ParamType::Uint(256), // rewardBaseCalAmount
        ParamType::Uint(256), // rewardAmount
        ParamType::Bool,      // oracleCalled
    ];
    let tokens = abi::decode(&params, data)
        .map_err(|e| ChainError::MalformedResponse(format!("rounds() decode failed: {}", e)))?;
    if tokens.len() != params.len() {
        return Err(ChainError::MalformedResponse(format!(
            "rounds() returned {} fields, expected {}",
            tokens.len(),
            params.len()
        )));
    }

    let uint_at = |i: usize| -> Result<U256, ChainError> {
        match &tokens[i] {
            Token::Uint(value) => Ok(*value),
            other => Err(ChainError::MalformedResponse(format!(
                "rounds() field {} is not a uint: {:?}",
                i, other
            ))),
        }
    };
    let int_at = |i: usize| -> Result<I256, ChainError> {
        match &tokens[i] {
            Token::Int(value) => Ok(I256::from_raw(*value)),
            other => Err(ChainError::MalformedResponse(format!(
                "rounds() field {} is not an int: {:?}",
                i, other
            ))),
        }
    };
    let oracle_called = match &tokens[13] {
        Token::Bool(value) => *value,
        other => {
            return Err(ChainError::MalformedResponse(format!(
                "rounds() field 13 is not a bool: {:?}",
                other
            )))
        }
    };

    Ok(Round {
        epoch: uint_at(0)?.as_u64(),
        start_timestamp: uint_at(1)?.as_u64(),
        lock_timestamp: uint_at(2)?.as_u64(),
        close_timestamp: uint_at(3)?.as_u64(),
        lock_price: int_at(4)?,
        close_price: int_at(5)?,
        total_amount: uint_at(8)?,
        bull_amount: uint_at(9)?,
        bear_amount: uint_at(10)?,
        oracle_called,
    })
}

/// Log filter matching all three prediction events, optionally narrowed to a
/// single bettor via the indexed `sender` topic.
pub fn bet_filter(contract: Address, sender: Option<Address>) -> Filter {
    let mut filter = Filter::new().address(contract).topic0(ValueOrArray::Array(vec![
        *BET_BULL_TOPIC,
        *BET_BEAR_TOPIC,
        *CLAIM_TOPIC,
    ]));
    if let Some(sender) = sender {
        filter = filter.topic1(H256::from(sender));
    }
    filter
}

/// Decodes a raw on-chain amount into an exact decimal string.
///
/// Full precision, no floats: `500000000000000000` becomes `"0.5"`. Trailing
/// zeros are trimmed so the output matches what a human wrote, while
/// [`parse_amount`] reproduces the original integer exactly.
pub fn format_amount(raw: U256) -> String {
    let full = format_units(raw, AMOUNT_DECIMALS)
        .unwrap_or_else(|_| raw.to_string());
    match full.split_once('.') {
        Some((whole, frac)) => {
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                whole.to_string()
            } else {
                format!("{}.{}", whole, frac)
            }
        }
        None => full,
    }
}

/// Re-encodes a decimal amount string into the chain's integer representation.
pub fn parse_amount(amount: &str) -> Result<U256, ChainError> {
    match parse_units(amount, AMOUNT_DECIMALS) {
        Ok(ParseUnits::U256(value)) => Ok(value),
        Ok(ParseUnits::I256(_)) => Err(ChainError::MalformedResponse(format!(
            "negative amount: {}",
            amount
        ))),
        Err(e) => Err(ChainError::MalformedResponse(format!(
            "unparseable amount {}: {}",
            amount, e
        ))),
    }
}
