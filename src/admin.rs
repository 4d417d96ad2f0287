// src/admin.rs

// operator view of blocked and suspicious clients

// dependencies
use serde::Serialize;
use std::sync::Arc;

use crate::blocks::BlockReason;
use crate::clock::{Clock, SystemClock, minutes_until};
use crate::detector::AbuseDetector;
use crate::errors::GateError;

const NANOS_PER_MILLI: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedClient {
    pub client_id: String,
    pub reason: BlockReason,
    pub description: String,
    pub blocked_at_ms: u64,
    pub expires_at_ms: u64,
    pub minutes_remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousEntry {
    pub client_id: String,
    pub keywords: Vec<String>,
    pub timestamp_ms: u64,
    pub message_preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspiciousActivityReport {
    pub blocked_clients: Vec<BlockedClient>,
    pub suspicious_patterns: Vec<SuspiciousEntry>,
    pub active_clients: usize,
    pub total_tracked_requests: usize,
}

/// Operator actions on abuse state.
pub struct AdminFacade<C = SystemClock>
where
    C: Clock,
{
    detector: Arc<AbuseDetector<C>>,
}

impl<C> AdminFacade<C>
where
    C: Clock,
{
    pub fn new(detector: Arc<AbuseDetector<C>>) -> Self {
        Self { detector }
    }

    /// Current blocks, recorded strikes and traffic totals.
    pub fn suspicious_activity(&self) -> Result<SuspiciousActivityReport, GateError> {
        let now = self.detector.now()?;
        let activity = self.detector.activity();

        let blocked_clients = self
            .detector
            .blocks()
            .snapshot(now)
            .into_iter()
            .map(|(client_id, entry)| BlockedClient {
                client_id,
                reason: entry.reason,
                minutes_remaining: minutes_until(now, entry.expires_at),
                blocked_at_ms: entry.blocked_at / NANOS_PER_MILLI,
                expires_at_ms: entry.expires_at / NANOS_PER_MILLI,
                description: entry.description,
            })
            .collect();

        let suspicious_patterns = activity
            .suspicious_patterns()
            .into_iter()
            .map(|(client_id, pattern)| SuspiciousEntry {
                client_id,
                keywords: pattern.keywords,
                timestamp_ms: pattern.timestamp / NANOS_PER_MILLI,
                message_preview: pattern.message_preview,
            })
            .collect();

        Ok(SuspiciousActivityReport {
            blocked_clients,
            suspicious_patterns,
            active_clients: activity.active_clients(),
            total_tracked_requests: activity.total_tracked_requests(),
        })
    }

    /// Lift a client's block immediately. Returns `false` if none existed.
    pub fn unblock_client(&self, client_id: &str) -> bool {
        self.detector.unblock(client_id)
    }
}
