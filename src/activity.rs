// src/activity.rs

// per-client sliding windows of requests, messages and suspicious strikes

// dependencies
use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use std::collections::VecDeque;

/// A message admitted for a client, with its arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentMessage {
    pub text: String,
    pub timestamp: u64,
}

/// Recent traffic from one client. Timestamps are in arrival order.
#[derive(Debug, Default)]
pub struct ClientActivity {
    pub(crate) request_timestamps: VecDeque<u64>,
    pub(crate) recent_messages: VecDeque<RecentMessage>,
}

impl ClientActivity {
    /// Requests with a timestamp strictly after `since`.
    pub fn requests_since(&self, since: u64) -> usize {
        // timestamps are ordered, so count from the back
        self.request_timestamps
            .iter()
            .rev()
            .take_while(|&&t| t > since)
            .count()
    }

    /// Admitted messages after `since` whose text equals `text`.
    pub fn identical_messages_since(&self, text: &str, since: u64) -> usize {
        self.recent_messages
            .iter()
            .rev()
            .take_while(|m| m.timestamp > since)
            .filter(|m| m.text == text)
            .count()
    }

    pub(crate) fn record(&mut self, text: &str, now: u64, max_messages: usize) {
        self.request_timestamps.push_back(now);
        self.recent_messages.push_back(RecentMessage {
            text: text.to_string(),
            timestamp: now,
        });
        while self.recent_messages.len() > max_messages {
            self.recent_messages.pop_front();
        }
    }

    /// Drop everything at or before `cutoff`.
    pub(crate) fn prune(&mut self, cutoff: u64) {
        while self.request_timestamps.front().is_some_and(|&t| t <= cutoff) {
            self.request_timestamps.pop_front();
        }
        while self.recent_messages.front().is_some_and(|m| m.timestamp <= cutoff) {
            self.recent_messages.pop_front();
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_timestamps.len()
    }

    pub fn is_idle(&self) -> bool {
        self.request_timestamps.is_empty()
    }
}

/// A message that matched one or more suspicious keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspiciousPattern {
    pub keywords: Vec<String>,
    pub timestamp: u64,
    pub message_preview: String,
}

/// Characters of a flagged message kept for operators.
pub(crate) const PREVIEW_CHARS: usize = 100;

pub(crate) fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Process-wide store of client activity and suspicious strikes.
#[derive(Debug, Default)]
pub struct ClientActivityStore {
    clients: DashMap<String, ClientActivity>,
    suspicious: DashMap<String, Vec<SuspiciousPattern>>,
}

impl ClientActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to a client's activity, created on first use. The
    /// returned guard holds the shard lock until dropped.
    pub(crate) fn lock(&self, client_id: &str) -> RefMut<'_, String, ClientActivity> {
        match self.clients.get_mut(client_id) {
            Some(activity) => activity,
            None => self.clients.entry(client_id.to_string()).or_default(),
        }
    }

    /// Append a strike and return how many strikes fall after `since`.
    pub(crate) fn add_suspicious(
        &self,
        client_id: &str,
        pattern: SuspiciousPattern,
        since: u64,
        cap: usize,
    ) -> usize {
        let mut log = self.suspicious.entry(client_id.to_string()).or_default();
        log.push(pattern);
        if log.len() > cap {
            let excess = log.len() - cap;
            log.drain(..excess);
        }
        log.iter().filter(|p| p.timestamp > since).count()
    }

    pub(crate) fn clear_suspicious(&self, client_id: &str) -> bool {
        self.suspicious.remove(client_id).is_some()
    }

    /// Prune request windows and strikes at or before `cutoff`, evicting
    /// clients left with nothing. Returns the number of evicted clients.
    pub(crate) fn prune(&self, cutoff: u64) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, activity| {
            activity.prune(cutoff);
            !activity.is_idle()
        });
        self.suspicious.retain(|_, log| {
            log.retain(|p| p.timestamp > cutoff);
            !log.is_empty()
        });
        before.saturating_sub(self.clients.len())
    }

    /// Clients with at least one request in their window.
    pub fn active_clients(&self) -> usize {
        self.clients.iter().filter(|c| !c.value().is_idle()).count()
    }

    pub fn total_tracked_requests(&self) -> usize {
        self.clients.iter().map(|c| c.value().request_count()).sum()
    }

    /// All suspicious strikes, ordered by client then time.
    pub fn suspicious_patterns(&self) -> Vec<(String, SuspiciousPattern)> {
        let mut patterns: Vec<(String, SuspiciousPattern)> = self
            .suspicious
            .iter()
            .flat_map(|log| {
                let client = log.key().clone();
                log.value()
                    .iter()
                    .cloned()
                    .map(move |p| (client.clone(), p))
                    .collect::<Vec<_>>()
            })
            .collect();
        patterns.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.timestamp.cmp(&b.1.timestamp)));
        patterns
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}
