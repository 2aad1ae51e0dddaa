//! # Event Deduplicator
//!
//! At-most-once gate for event delivery. The live WebSocket stream and the
//! scheduler's periodic re-poll can both observe the same chain event; this
//! set is the single source of truth reconciling both paths into one logical
//! delivery per `(address, epoch, kind)`.
//!
//! The set is unbounded for the process lifetime. That is acceptable because
//! the key space is bounded by watched-address cardinality times realistic
//! epoch counts; a very long-running deployment would want a time-windowed
//! or LRU-bounded variant.

use dashmap::DashSet;

use crate::types::DedupKey;

#[derive(Debug, Default)]
pub struct EventDeduplicator {
    seen: DashSet<DedupKey>,
}

impl EventDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    pub fn mark(&self, key: DedupKey) {
        self.seen.insert(key);
    }

    /// Atomic check-and-mark: true exactly once per key, across any
    /// interleaving of delivery paths.
    pub fn first_seen(&self, key: DedupKey) -> bool {
        self.seen.insert(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BetKind;
    use ethers::types::Address;

    #[test]
    fn first_seen_fires_exactly_once() {
        let dedup = EventDeduplicator::new();
        let key = DedupKey::new(Address::repeat_byte(0xab), 100, BetKind::Bull);
        assert!(dedup.first_seen(key));
        assert!(!dedup.first_seen(key));
        assert!(dedup.seen(&key));
    }

    #[test]
    fn keys_are_independent_per_kind_and_epoch() {
        let dedup = EventDeduplicator::new();
        let addr = Address::repeat_byte(0x01);
        dedup.mark(DedupKey::new(addr, 1, BetKind::Bull));
        assert!(!dedup.seen(&DedupKey::new(addr, 1, BetKind::Bear)));
        assert!(!dedup.seen(&DedupKey::new(addr, 2, BetKind::Bull)));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn concurrent_marks_deliver_once() {
        let dedup = std::sync::Arc::new(EventDeduplicator::new());
        let key = DedupKey::new(Address::repeat_byte(0xcd), 7, BetKind::Claim);
        let hits: usize = (0..16)
            .map(|_| {
                let dedup = dedup.clone();
                std::thread::spawn(move || dedup.first_seen(key) as usize)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(hits, 1);
    }
}
