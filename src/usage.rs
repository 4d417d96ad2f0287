// src/usage.rs

// free-tier metering against persisted counters plus unflushed deltas

// dependencies
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::collaborators::{
    AuditEvent, AuditLogger, PersistedUsage, SubscriptionProvider, UsageCounterStore,
    UsageDeltaRecord,
};
use crate::config::UsageConfig;
use crate::errors::GateError;

/// Increments not yet written to the counter store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub daily: u64,
    pub monthly: u64,
}

impl UsageDelta {
    pub fn is_zero(&self) -> bool {
        self.daily == 0 && self.monthly == 0
    }
}

/// Pending usage per user, awaiting the next flush.
#[derive(Debug, Default)]
pub struct UsageDeltaCache {
    pending: DashMap<String, UsageDelta>,
}

impl UsageDeltaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self, user_id: &str) -> UsageDelta {
        self.pending
            .get(user_id)
            .map(|delta| *delta.value())
            .unwrap_or_default()
    }

    /// Add one message for the user and return the new pending delta.
    pub fn increment(&self, user_id: &str) -> UsageDelta {
        let mut delta = self.pending.entry(user_id.to_string()).or_default();
        delta.daily += 1;
        delta.monthly += 1;
        *delta
    }

    /// Non-zero deltas, ordered by user id.
    pub fn snapshot(&self) -> Vec<UsageDeltaRecord> {
        let mut batch: Vec<UsageDeltaRecord> = self
            .pending
            .iter()
            .filter(|entry| !entry.value().is_zero())
            .map(|entry| UsageDeltaRecord {
                user_id: entry.key().clone(),
                daily_delta: entry.value().daily,
                monthly_delta: entry.value().monthly,
            })
            .collect();
        batch.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        batch
    }

    /// Subtract a flushed amount, removing the user once nothing is pending.
    /// Increments that arrived after the snapshot are kept.
    pub fn settle(&self, user_id: &str, flushed: UsageDelta) {
        if let Some(mut delta) = self.pending.get_mut(user_id) {
            delta.daily = delta.daily.saturating_sub(flushed.daily);
            delta.monthly = delta.monthly.saturating_sub(flushed.monthly);
        }
        self.pending.remove_if(user_id, |_, delta| delta.is_zero());
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.pending.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Effective usage against the free limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageStatus {
    pub over: bool,
    pub daily_used: u64,
    pub monthly_used: u64,
    pub daily_remaining: u64,
    pub monthly_remaining: u64,
}

/// Outcome of [`UsageMeter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Counted; the status includes this message.
    Admitted(UsageStatus),
    /// Not counted; the user was already at a limit.
    Denied(UsageStatus),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    pub fn status(&self) -> &UsageStatus {
        match self {
            Admission::Admitted(status) | Admission::Denied(status) => status,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    usage: PersistedUsage,
    fetched_at: u64,
}

/// Meters free-tier users against daily and monthly limits.
///
/// Usage is counted in memory only; the flush coordinator persists it.
pub struct UsageMeter<C = SystemClock>
where
    C: Clock,
{
    config: UsageConfig,
    cache: Arc<UsageDeltaCache>,
    subscriptions: Arc<dyn SubscriptionProvider>,
    store: Arc<dyn UsageCounterStore>,
    snapshots: DashMap<String, Snapshot>,
    flush_signal: Arc<Notify>,
    audit: Arc<dyn AuditLogger>,
    clock: C,
}

impl<C> UsageMeter<C>
where
    C: Clock,
{
    pub fn new(
        config: UsageConfig,
        cache: Arc<UsageDeltaCache>,
        subscriptions: Arc<dyn SubscriptionProvider>,
        store: Arc<dyn UsageCounterStore>,
        flush_signal: Arc<Notify>,
        audit: Arc<dyn AuditLogger>,
        clock: C,
    ) -> Result<Self, GateError> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            subscriptions,
            store,
            snapshots: DashMap::new(),
            flush_signal,
            audit,
            clock,
        })
    }

    /// Whether the user holds an active or trial subscription.
    ///
    /// Lookup errors and timeouts count as unsubscribed, so a failing billing
    /// system never grants unmetered access.
    pub async fn is_subscribed(&self, user_id: &str) -> bool {
        let lookup = tokio::time::timeout(self.config.lookup_timeout, self.subscriptions.status(user_id))
            .await
            .map_err(|_| GateError::Timeout("subscription lookup"))
            .and_then(|result| result);
        match lookup {
            Ok(status) => status.is_some_and(|s| s.bypasses_metering()),
            Err(err) => {
                warn!(
                    user_id = %user_id,
                    error = %err,
                    "subscription lookup failed, metering as free tier"
                );
                false
            }
        }
    }

    /// Persisted counters for the user. Falls back to the last successful
    /// read (or zero) when the store is unavailable.
    pub async fn persisted_usage(&self, user_id: &str) -> Result<PersistedUsage, GateError> {
        let now = self.clock.now()?;
        let lookup = tokio::time::timeout(self.config.lookup_timeout, self.store.usage(user_id))
            .await
            .map_err(|_| GateError::Timeout("usage lookup"))
            .and_then(|result| result);
        match lookup {
            Ok(usage) => {
                let usage = usage.unwrap_or_default();
                self.snapshots.insert(
                    user_id.to_string(),
                    Snapshot {
                        usage,
                        fetched_at: now,
                    },
                );
                Ok(usage)
            }
            Err(err) => {
                let fallback = self
                    .snapshots
                    .get(user_id)
                    .map(|snapshot| snapshot.usage)
                    .unwrap_or_default();
                warn!(
                    user_id = %user_id,
                    error = %err,
                    daily_count = fallback.daily_count,
                    monthly_count = fallback.monthly_count,
                    "usage lookup failed, using last known counters"
                );
                Ok(fallback)
            }
        }
    }

    /// Compare effective usage (persisted plus pending) with the free limits.
    pub fn is_over_limit(&self, user_id: &str, persisted: &PersistedUsage) -> UsageStatus {
        self.status(persisted, self.cache.pending(user_id))
    }

    /// Count one message for the user. Memory only.
    pub fn record_usage(&self, user_id: &str) {
        let pending = self.cache.increment(user_id);
        debug!(
            user_id = %user_id,
            pending_daily = pending.daily,
            pending_monthly = pending.monthly,
            "usage recorded"
        );
        self.request_flush_if_pressured();
    }

    /// Check the limits and, if the user is under them, count the message,
    /// both under the user's cache entry lock. An admitted status reflects
    /// usage after the increment.
    pub fn admit(&self, user_id: &str, persisted: &PersistedUsage) -> Admission {
        let admission = {
            let mut pending = self.cache_entry(user_id);
            let before = self.status(persisted, *pending);
            if before.over {
                Admission::Denied(before)
            } else {
                pending.daily += 1;
                pending.monthly += 1;
                Admission::Admitted(self.status(persisted, *pending))
            }
        };

        match admission {
            Admission::Denied(status) => {
                // a denied user with nothing pending must not linger in the cache
                self.cache.pending.remove_if(user_id, |_, delta| delta.is_zero());
                debug!(
                    user_id = %user_id,
                    daily_used = status.daily_used,
                    monthly_used = status.monthly_used,
                    "free quota exhausted"
                );
                self.audit.log(&AuditEvent::QuotaExceeded {
                    user_id: user_id.to_string(),
                    daily_used: status.daily_used,
                    monthly_used: status.monthly_used,
                });
            }
            Admission::Admitted(_) => self.request_flush_if_pressured(),
        }
        admission
    }

    /// Forget persisted snapshots older than the configured age.
    pub fn prune_snapshots(&self) -> Result<usize, GateError> {
        let now = self.clock.now()?;
        let max_age = self.config.snapshot_max_age.as_nanos() as u64;
        let before = self.snapshots.len();
        self.snapshots
            .retain(|_, snapshot| now.saturating_sub(snapshot.fetched_at) <= max_age);
        Ok(before.saturating_sub(self.snapshots.len()))
    }

    pub fn cache(&self) -> &Arc<UsageDeltaCache> {
        &self.cache
    }

    pub fn config(&self) -> &UsageConfig {
        &self.config
    }

    fn cache_entry(&self, user_id: &str) -> dashmap::mapref::one::RefMut<'_, String, UsageDelta> {
        self.cache.pending.entry(user_id.to_string()).or_default()
    }

    fn status(&self, persisted: &PersistedUsage, pending: UsageDelta) -> UsageStatus {
        let daily_used = persisted.daily_count.saturating_add(pending.daily);
        let monthly_used = persisted.monthly_count.saturating_add(pending.monthly);
        let daily_limit = self.config.free_daily_limit;
        let monthly_limit = self.config.free_monthly_limit;
        UsageStatus {
            over: daily_used >= daily_limit || monthly_used >= monthly_limit,
            daily_used,
            monthly_used,
            daily_remaining: daily_limit.saturating_sub(daily_used),
            monthly_remaining: monthly_limit.saturating_sub(monthly_used),
        }
    }

    // must not be called while holding a cache entry: len() visits every shard
    fn request_flush_if_pressured(&self) {
        let size = self.cache.len();
        if size > self.config.max_delta_cache_size {
            debug!(
                pending_users = size,
                threshold = self.config.max_delta_cache_size,
                "usage cache over threshold, requesting flush"
            );
            self.flush_signal.notify_one();
        }
    }
}
