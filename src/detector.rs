// src/detector.rs

// sliding-window abuse detection: rate limits, message length, keywords, repeats

// dependencies
use dashmap::mapref::one::RefMut;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::activity::{ClientActivity, ClientActivityStore, SuspiciousPattern, preview};
use crate::blocks::{BlockEntry, BlockReason, BlockRegistry};
use crate::clock::{Clock, NANOS_PER_HOUR, NANOS_PER_MINUTE, SystemClock, minutes_until};
use crate::collaborators::{AuditEvent, AuditLogger, TracingAuditLogger};
use crate::config::AbuseConfig;
use crate::errors::GateError;

/// Details of a block, as reported to the blocked client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNotice {
    pub reason: BlockReason,
    pub description: String,
    pub blocked_at: u64,
    pub expires_at: u64,
    pub minutes_remaining: u64,
}

impl BlockNotice {
    fn from_entry(entry: &BlockEntry, now: u64) -> Self {
        Self {
            reason: entry.reason,
            description: entry.description.clone(),
            blocked_at: entry.blocked_at,
            expires_at: entry.expires_at,
            minutes_remaining: minutes_until(now, entry.expires_at),
        }
    }
}

/// Outcome of an abuse check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbuseVerdict {
    Clear,
    Blocked(BlockNotice),
}

impl AbuseVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, AbuseVerdict::Blocked(_))
    }

    pub fn notice(&self) -> Option<&BlockNotice> {
        match self {
            AbuseVerdict::Clear => None,
            AbuseVerdict::Blocked(notice) => Some(notice),
        }
    }
}

/// Counts from one background sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub evicted_clients: usize,
    pub expired_blocks: usize,
}

/// Decides whether a client may proceed, and blocks clients that trip a rule.
///
/// `C` is the clock type, defaulting to SystemClock.
pub struct AbuseDetector<C = SystemClock>
where
    C: Clock,
{
    config: AbuseConfig,
    activity: Arc<ClientActivityStore>,
    blocks: Arc<BlockRegistry>,
    audit: Arc<dyn AuditLogger>,
    clock: C,
}

impl<C> AbuseDetector<C>
where
    C: Clock,
{
    pub fn new(
        config: AbuseConfig,
        activity: Arc<ClientActivityStore>,
        blocks: Arc<BlockRegistry>,
        audit: Arc<dyn AuditLogger>,
        clock: C,
    ) -> Result<Self, GateError> {
        config.validate()?;
        Ok(Self {
            config,
            activity,
            blocks,
            audit,
            clock,
        })
    }

    /// Detector with fresh stores that audits through `tracing`.
    pub fn with_config(config: AbuseConfig, clock: C) -> Result<Self, GateError> {
        Self::new(
            config,
            Arc::new(ClientActivityStore::new()),
            Arc::new(BlockRegistry::new()),
            Arc::new(TracingAuditLogger),
            clock,
        )
    }

    /// Check a message against the client's current state. Does not record
    /// the request; call `record_activity` once it is admitted.
    pub fn check(&self, client_id: &str, message: &str) -> Result<AbuseVerdict, GateError> {
        let guard = self.lock_client(client_id)?;
        Ok(guard.check(message))
    }

    /// Record an admitted request.
    pub fn record_activity(&self, client_id: &str, message: &str) -> Result<(), GateError> {
        let guard = self.lock_client(client_id)?;
        guard.record(message);
        Ok(())
    }

    /// The client's block, if one is in force. Never touches activity state.
    pub fn active_block(&self, client_id: &str) -> Result<Option<BlockNotice>, GateError> {
        let now = self.clock.now()?;
        Ok(self
            .blocks
            .active(client_id, now)
            .map(|entry| BlockNotice::from_entry(&entry, now)))
    }

    /// Lock the client's activity so that a check and the matching record
    /// happen against the same state.
    pub fn lock_client<'a>(&'a self, client_id: &'a str) -> Result<ClientGuard<'a, C>, GateError> {
        let activity = self.activity.lock(client_id);
        // read after the lock so recorded timestamps stay in order per client
        let now = self.clock.now()?;
        Ok(ClientGuard {
            detector: self,
            client_id,
            activity,
            now,
        })
    }

    /// Lift a block and forget the client's suspicious strikes.
    pub fn unblock(&self, client_id: &str) -> bool {
        let removed = self.blocks.unblock(client_id);
        self.activity.clear_suspicious(client_id);
        if removed {
            info!(client_id = %client_id, "client unblocked by operator");
            self.audit.log(&AuditEvent::ClientUnblocked {
                client_id: client_id.to_string(),
            });
        }
        removed
    }

    /// Drop history older than an hour, evict idle clients and expired blocks.
    pub fn sweep(&self) -> Result<SweepStats, GateError> {
        let now = self.clock.now()?;
        let stats = SweepStats {
            evicted_clients: self.activity.prune(now.saturating_sub(NANOS_PER_HOUR)),
            expired_blocks: self.blocks.remove_expired(now),
        };
        debug!(
            evicted_clients = stats.evicted_clients,
            expired_blocks = stats.expired_blocks,
            tracked_clients = self.activity.tracked_clients(),
            "abuse window sweep complete"
        );
        Ok(stats)
    }

    pub fn activity(&self) -> &ClientActivityStore {
        &self.activity
    }

    pub fn blocks(&self) -> &BlockRegistry {
        &self.blocks
    }

    pub fn config(&self) -> &AbuseConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> Result<u64, GateError> {
        Ok(self.clock.now()?)
    }

    // rules run in order and stop at the first match
    fn evaluate(
        &self,
        client_id: &str,
        message: &str,
        activity: &ClientActivity,
        now: u64,
    ) -> AbuseVerdict {
        if let Some(entry) = self.blocks.active(client_id, now) {
            return AbuseVerdict::Blocked(BlockNotice::from_entry(&entry, now));
        }

        let minute_ago = now.saturating_sub(NANOS_PER_MINUTE);
        let hour_ago = now.saturating_sub(NANOS_PER_HOUR);

        let per_minute = activity.requests_since(minute_ago);
        if per_minute > self.config.max_requests_per_minute {
            return self.impose(
                client_id,
                BlockReason::RateLimitMinute,
                format!(
                    "Too many requests: {per_minute} in the last minute (limit {})",
                    self.config.max_requests_per_minute
                ),
                now,
            );
        }

        let per_hour = activity.requests_since(hour_ago);
        if per_hour > self.config.max_requests_per_hour {
            return self.impose(
                client_id,
                BlockReason::RateLimitHour,
                format!(
                    "Too many requests: {per_hour} in the last hour (limit {})",
                    self.config.max_requests_per_hour
                ),
                now,
            );
        }

        let length = message.chars().count();
        if length > self.config.max_message_length {
            return self.impose(
                client_id,
                BlockReason::MessageTooLong,
                format!(
                    "Message too long: {length} characters (limit {})",
                    self.config.max_message_length
                ),
                now,
            );
        }

        let lowered = message.to_lowercase();
        let matched: Vec<String> = self
            .config
            .suspicious_keywords
            .iter()
            .filter(|keyword| lowered.contains(keyword.as_str()))
            .cloned()
            .collect();
        if !matched.is_empty() {
            let strikes = self.activity.add_suspicious(
                client_id,
                SuspiciousPattern {
                    keywords: matched.clone(),
                    timestamp: now,
                    message_preview: preview(message),
                },
                hour_ago,
                self.config.max_suspicious_entries,
            );
            warn!(
                client_id = %client_id,
                keywords = ?matched,
                strikes,
                "suspicious content detected"
            );
            if strikes >= self.config.suspicious_strikes {
                return self.impose(
                    client_id,
                    BlockReason::SuspiciousContent,
                    format!("Suspicious content detected in {strikes} recent messages"),
                    now,
                );
            }
        }

        // the current message counts toward the repeat threshold
        let repeats = activity.identical_messages_since(message, minute_ago) + 1;
        if repeats >= self.config.spam_repeat_threshold {
            return self.impose(
                client_id,
                BlockReason::Spam,
                format!("Identical message sent {repeats} times within a minute"),
                now,
            );
        }

        AbuseVerdict::Clear
    }

    fn impose(
        &self,
        client_id: &str,
        reason: BlockReason,
        description: String,
        now: u64,
    ) -> AbuseVerdict {
        let duration = u64::try_from(self.config.block_duration.as_nanos()).unwrap_or(u64::MAX);
        let expires_at = now.saturating_add(duration);
        let entry = BlockEntry {
            reason,
            description,
            blocked_at: now,
            expires_at,
        };
        warn!(
            client_id = %client_id,
            reason = %reason,
            expires_in_secs = self.config.block_duration.as_secs(),
            "client blocked: {}",
            entry.description
        );
        self.audit.log(&AuditEvent::ClientBlocked {
            client_id: client_id.to_string(),
            reason,
            description: entry.description.clone(),
            expires_at_ms: expires_at / 1_000_000,
        });
        let notice = BlockNotice::from_entry(&entry, now);
        self.blocks.block(client_id, entry);
        AbuseVerdict::Blocked(notice)
    }

    fn track(&self, client_id: &str, message: &str, activity: &mut ClientActivity, now: u64) {
        activity.record(message, now, self.config.max_recent_messages);
        debug!(
            client_id = %client_id,
            requests_in_window = activity.request_count(),
            "client activity recorded"
        );
    }
}

/// Exclusive hold on one client's activity.
///
/// Obtained from [`AbuseDetector::lock_client`]. Other requests from the same
/// client wait until the guard is dropped or consumed by `record`.
pub struct ClientGuard<'a, C>
where
    C: Clock,
{
    detector: &'a AbuseDetector<C>,
    client_id: &'a str,
    activity: RefMut<'a, String, ClientActivity>,
    now: u64,
}

impl<C> ClientGuard<'_, C>
where
    C: Clock,
{
    /// Evaluate the message against the state before this request.
    pub fn check(&self, message: &str) -> AbuseVerdict {
        self.detector
            .evaluate(self.client_id, message, &self.activity, self.now)
    }

    /// Record the request and release the client.
    pub fn record(mut self, message: &str) {
        self.detector
            .track(self.client_id, message, &mut self.activity, self.now);
    }

    pub fn now(&self) -> u64 {
        self.now
    }
}
