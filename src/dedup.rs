//! Fingerprints and dedup ledgers for both engines.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Capacity of the feed ledger ring.
pub const FEED_LEDGER_CAPACITY: usize = 100;

/// Fingerprint of an export row: its leading stamp plus primary content.
///
/// Two distinct rows sharing both fields collide and the later one is
/// treated as already imported.
pub fn row_fingerprint(stamp: &str, content: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(stamp.as_bytes());
    hasher.update(&[0x1f]);
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Fingerprint of a feed entry's unique identifier.
pub fn entry_fingerprint(unique_id: &str) -> String {
    blake3::hash(unique_id.as_bytes()).to_hex().to_string()
}

/// What happened to a fingerprinted row; either way it is never retried
/// within the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOutcome {
    Imported,
    Failed,
}

/// Bounded FIFO of recently imported feed-entry fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedLedger {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for FeedLedger {
    fn default() -> Self {
        Self::with_capacity(FEED_LEDGER_CAPACITY)
    }
}

impl FeedLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(FEED_LEDGER_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries.iter().any(|e| e == fingerprint)
    }

    /// Append, evicting the oldest entries past capacity. Re-inserting a
    /// present fingerprint is a no-op.
    pub fn insert(&mut self, fingerprint: String) {
        if self.contains(&fingerprint) {
            return;
        }
        self.entries.push_back(fingerprint);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Re-apply the bound, e.g. after loading a ledger persisted by an older
    /// build with a larger ring.
    pub fn trim(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}
