// src/blocks.rs

// temporary per-client blocks with lazy expiry

// dependencies
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a client was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    RateLimitMinute,
    RateLimitHour,
    MessageTooLong,
    SuspiciousContent,
    Spam,
}

impl BlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockReason::RateLimitMinute => "rate_limit_minute",
            BlockReason::RateLimitHour => "rate_limit_hour",
            BlockReason::MessageTooLong => "message_too_long",
            BlockReason::SuspiciousContent => "suspicious_content",
            BlockReason::Spam => "spam",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An active block. Times are nanoseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub reason: BlockReason,
    pub description: String,
    pub blocked_at: u64,
    pub expires_at: u64,
}

impl BlockEntry {
    /// A block is still in force at its exact expiry instant.
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// At most one block per client; a new block replaces the old one.
#[derive(Debug, Default)]
pub struct BlockRegistry {
    entries: DashMap<String, BlockEntry>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client's block if it is still in force, discarding it if it
    /// has expired.
    pub fn active(&self, client_id: &str, now: u64) -> Option<BlockEntry> {
        let entry = self.entries.get(client_id)?.clone();
        if entry.is_expired(now) {
            self.entries
                .remove_if(client_id, |_, current| current.is_expired(now));
            return None;
        }
        Some(entry)
    }

    pub fn block(&self, client_id: &str, entry: BlockEntry) {
        self.entries.insert(client_id.to_string(), entry);
    }

    /// Returns `true` if a block (expired or not) was removed.
    pub fn unblock(&self, client_id: &str) -> bool {
        self.entries.remove(client_id).is_some()
    }

    /// Drop every expired block. Returns how many were removed.
    pub fn remove_expired(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Blocks still in force at `now`, sorted by client id.
    pub fn snapshot(&self, now: u64) -> Vec<(String, BlockEntry)> {
        let mut blocks: Vec<(String, BlockEntry)> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        blocks.sort_by(|a, b| a.0.cmp(&b.0));
        blocks
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
