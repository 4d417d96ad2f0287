// src/flush.rs

// batches pending usage deltas into the durable counter store

// dependencies
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::collaborators::{AuditEvent, AuditLogger, UsageCounterStore};
use crate::errors::GateError;
use crate::usage::{UsageDelta, UsageDeltaCache};

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Nothing was pending.
    Idle,
    /// Another flush was running and this one was not forced.
    Busy,
    /// The store accepted the batch. `retained` users were left out by the
    /// store and stay pending.
    Applied { applied: usize, retained: usize },
    /// The store call failed or timed out; all `pending` users stay pending.
    Failed { pending: usize },
}

/// Drains the usage delta cache into the counter store.
///
/// The cache is only read while building the batch and while settling the
/// applied entries, never across the store call.
pub struct FlushCoordinator {
    cache: Arc<UsageDeltaCache>,
    store: Arc<dyn UsageCounterStore>,
    audit: Arc<dyn AuditLogger>,
    timeout: Duration,
    in_flight: Mutex<()>,
    signal: Arc<Notify>,
}

impl FlushCoordinator {
    pub fn new(
        cache: Arc<UsageDeltaCache>,
        store: Arc<dyn UsageCounterStore>,
        audit: Arc<dyn AuditLogger>,
        timeout: Duration,
        signal: Arc<Notify>,
    ) -> Self {
        Self {
            cache,
            store,
            audit,
            timeout,
            in_flight: Mutex::new(()),
            signal,
        }
    }

    /// Push pending deltas to the store in one batch.
    ///
    /// Only one flush runs at a time. An unforced flush gives up if another is
    /// running; a forced one waits its turn.
    pub async fn flush(&self, force: bool) -> FlushOutcome {
        let _turn = if force {
            self.in_flight.lock().await
        } else {
            match self.in_flight.try_lock() {
                Ok(turn) => turn,
                Err(_) => return FlushOutcome::Busy,
            }
        };

        let batch = self.cache.snapshot();
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        let result = tokio::time::timeout(self.timeout, self.store.apply_usage_deltas(&batch))
            .await
            .map_err(|_| GateError::Timeout("usage flush"))
            .and_then(|result| result);

        match result {
            Ok(applied_ids) => {
                let applied_ids: HashSet<&str> = applied_ids.iter().map(String::as_str).collect();
                let mut applied = 0;
                for record in batch.iter().filter(|r| applied_ids.contains(r.user_id.as_str())) {
                    self.cache.settle(
                        &record.user_id,
                        UsageDelta {
                            daily: record.daily_delta,
                            monthly: record.monthly_delta,
                        },
                    );
                    applied += 1;
                }
                let retained = batch.len() - applied;
                if retained > 0 {
                    warn!(applied, retained, "store applied part of the usage batch");
                }
                debug!(
                    applied,
                    retained,
                    forced = force,
                    still_pending = self.cache.len(),
                    "usage flush complete"
                );
                self.audit.log(&AuditEvent::FlushApplied {
                    users: applied,
                    retained,
                });
                FlushOutcome::Applied { applied, retained }
            }
            Err(err) => {
                warn!(
                    error = %err,
                    pending = batch.len(),
                    forced = force,
                    "usage flush failed, keeping deltas for the next attempt"
                );
                self.audit.log(&AuditEvent::FlushFailed {
                    users: batch.len(),
                    error: err.to_string(),
                });
                FlushOutcome::Failed {
                    pending: batch.len(),
                }
            }
        }
    }

    /// Ask the background flush loop to run soon. Never blocks.
    pub fn request(&self) {
        self.signal.notify_one();
    }

    pub fn signal(&self) -> &Arc<Notify> {
        &self.signal
    }

    /// Users with pending deltas.
    pub fn pending(&self) -> usize {
        self.cache.len()
    }
}
