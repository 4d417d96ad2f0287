// src/collaborators.rs

//! Interfaces the gate consumes from the rest of the platform.
//!
//! Subscriptions, durable usage counters and the audit trail live outside the
//! gate. They are injected as trait objects so deployments can back them with
//! a database, and tests with in-memory fakes.

// dependencies
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blocks::BlockReason;
use crate::errors::GateError;

/// Billing status reported by the subscription system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trial,
    PastDue,
    Canceled,
    Incomplete,
}

impl SubscriptionStatus {
    /// Active and trial subscribers are not metered.
    pub fn bypasses_metering(self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trial)
    }
}

#[async_trait]
pub trait SubscriptionProvider: Send + Sync {
    /// `Ok(None)` means the user has never subscribed.
    async fn status(&self, user_id: &str) -> Result<Option<SubscriptionStatus>, GateError>;
}

/// Durable usage counters as last read from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedUsage {
    pub daily_count: u64,
    pub monthly_count: u64,
}

/// One entry of a batch-apply call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDeltaRecord {
    pub user_id: String,
    pub daily_delta: u64,
    pub monthly_delta: u64,
}

/// The durable counter store.
///
/// The store is the single writer of its rows. `apply_usage_deltas` must add
/// the deltas after performing any daily/monthly period rollover itself, and
/// return the ids it actually applied.
#[async_trait]
pub trait UsageCounterStore: Send + Sync {
    async fn usage(&self, user_id: &str) -> Result<Option<PersistedUsage>, GateError>;

    async fn apply_usage_deltas(&self, batch: &[UsageDeltaRecord]) -> Result<Vec<String>, GateError>;
}

/// Events reported to the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ClientBlocked {
        client_id: String,
        reason: BlockReason,
        description: String,
        expires_at_ms: u64,
    },
    ClientUnblocked {
        client_id: String,
    },
    RequestAdmitted {
        client_id: String,
        user_id: String,
    },
    QuotaExceeded {
        user_id: String,
        daily_used: u64,
        monthly_used: u64,
    },
    FlushApplied {
        users: usize,
        retained: usize,
    },
    FlushFailed {
        users: usize,
        error: String,
    },
}

/// Fire-and-forget sink for audit events. Implementations must not block.
pub trait AuditLogger: Send + Sync {
    fn log(&self, event: &AuditEvent);
}

/// Audit logger that renders events as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, event: &AuditEvent) {
        match event {
            AuditEvent::ClientBlocked {
                client_id,
                reason,
                description,
                expires_at_ms,
            } => warn!(
                target: "usage_gate::audit",
                client_id = %client_id,
                reason = %reason,
                expires_at_ms,
                "client blocked: {description}"
            ),
            AuditEvent::ClientUnblocked { client_id } => {
                info!(target: "usage_gate::audit", client_id = %client_id, "client unblocked")
            }
            AuditEvent::RequestAdmitted { client_id, user_id } => debug!(
                target: "usage_gate::audit",
                client_id = %client_id,
                user_id = %user_id,
                "request admitted"
            ),
            AuditEvent::QuotaExceeded {
                user_id,
                daily_used,
                monthly_used,
            } => info!(
                target: "usage_gate::audit",
                user_id = %user_id,
                daily_used,
                monthly_used,
                "free quota exceeded"
            ),
            AuditEvent::FlushApplied { users, retained } => debug!(
                target: "usage_gate::audit",
                users,
                retained,
                "usage deltas flushed"
            ),
            AuditEvent::FlushFailed { users, error } => warn!(
                target: "usage_gate::audit",
                users,
                error = %error,
                "usage flush failed, deltas retained"
            ),
        }
    }
}
