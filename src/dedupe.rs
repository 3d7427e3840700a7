//! Duplicate-delivery guard.
//!
//! Upstream feeds are at-least-once: the same source transaction can arrive
//! via the push stream and the signature poller. Keys are recorded as soon as
//! a classification matches, before execution, so a slow or failing swap is
//! never retried by a second delivery (at-most-once-attempt).

use std::collections::{HashSet, VecDeque};

use solana_sdk::pubkey::Pubkey;

use crate::classify::TradeDirection;

/// Default capacity. At one mirrored trade a second this covers >2h of
/// uptime, far beyond any realistic redelivery window.
pub const DEFAULT_CAPACITY: usize = 8192;

/// Bounded insertion-ordered set of processed event keys. Oldest entries are
/// evicted once the capacity is reached, keeping memory flat over long runs.
pub struct ProcessedSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ProcessedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Record a key. Returns false when the key was already present.
    pub fn insert(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for ProcessedSet {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Composite key for feeds whose payloads carry trade facts but whose
/// signatures may be missing or truncated.
pub fn trade_key(mint: &Pubkey, direction: TradeDirection, signature: &str) -> String {
    format!("{mint}:{}:{signature}", direction.label())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_contains() {
        let mut set = ProcessedSet::new(16);
        assert!(set.is_empty());
        assert!(set.insert("sig-1".to_string()));
        assert!(!set.is_empty());
        assert!(set.contains("sig-1"));
        assert!(!set.contains("sig-2"));
    }

    #[test]
    fn duplicate_insert_reports_already_seen() {
        let mut set = ProcessedSet::new(16);
        assert!(set.insert("sig-1".to_string()));
        assert!(!set.insert("sig-1".to_string()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn oldest_key_is_evicted_at_capacity() {
        let mut set = ProcessedSet::new(3);
        for key in ["a", "b", "c"] {
            set.insert(key.to_string());
        }
        set.insert("d".to_string());
        assert_eq!(set.len(), 3);
        assert!(!set.contains("a"));
        assert!(set.contains("b"));
        assert!(set.contains("d"));
    }

    #[test]
    fn composite_keys_distinguish_direction() {
        let mint = Pubkey::new_unique();
        let buy = trade_key(&mint, TradeDirection::Buy, "sig");
        let sell = trade_key(&mint, TradeDirection::Sell, "sig");
        assert_ne!(buy, sell);
    }
}
