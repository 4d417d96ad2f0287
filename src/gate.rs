// src/gate.rs

//! The single admission decision for an inbound chat request.
//!
//! Abuse detection runs first so that spam and probing are stopped whatever
//! the caller's plan is. Metering runs second and only for free-tier users.
//! Admitted requests are counted once in each component.

// dependencies
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::activity::ClientActivityStore;
use crate::admin::AdminFacade;
use crate::blocks::{BlockReason, BlockRegistry};
use crate::clock::{Clock, NANOS_PER_SECOND, SystemClock};
use crate::collaborators::{
    AuditEvent, AuditLogger, SubscriptionProvider, TracingAuditLogger, UsageCounterStore,
};
use crate::config::GateConfig;
use crate::detector::{AbuseDetector, AbuseVerdict, BlockNotice};
use crate::errors::GateError;
use crate::flush::{FlushCoordinator, FlushOutcome};
use crate::scheduler::{BackgroundTasks, spawn_flush_loop, spawn_periodic};
use crate::usage::{Admission, UsageDeltaCache, UsageMeter, UsageStatus};

pub const HTTP_OK: u16 = 200;
pub const HTTP_PAYMENT_REQUIRED: u16 = 402;
pub const HTTP_TOO_MANY_REQUESTS: u16 = 429;
pub const HTTP_SERVICE_UNAVAILABLE: u16 = 503;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    RateLimitMinute,
    RateLimitHour,
    MessageTooLong,
    SuspiciousContent,
    Spam,
    QuotaExceeded,
    Unavailable,
}

impl From<BlockReason> for DenyReason {
    fn from(reason: BlockReason) -> Self {
        match reason {
            BlockReason::RateLimitMinute => DenyReason::RateLimitMinute,
            BlockReason::RateLimitHour => DenyReason::RateLimitHour,
            BlockReason::MessageTooLong => DenyReason::MessageTooLong,
            BlockReason::SuspiciousContent => DenyReason::SuspiciousContent,
            BlockReason::Spam => DenyReason::Spam,
        }
    }
}

/// Client-facing details of a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GateMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_remaining: Option<u64>,
    pub subscribed: bool,
    pub upgrade_required: bool,
}

/// Admission decision with an HTTP status equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateDecision {
    pub admit: bool,
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    pub meta: GateMeta,
}

impl GateDecision {
    fn admitted(quota: Option<UsageStatus>) -> Self {
        Self {
            admit: true,
            http_status: HTTP_OK,
            reason: None,
            meta: GateMeta {
                daily_remaining: quota.map(|q| q.daily_remaining),
                monthly_remaining: quota.map(|q| q.monthly_remaining),
                subscribed: quota.is_none(),
                ..GateMeta::default()
            },
        }
    }

    fn blocked(notice: &BlockNotice, now: u64) -> Self {
        Self {
            admit: false,
            http_status: HTTP_TOO_MANY_REQUESTS,
            reason: Some(notice.reason.into()),
            meta: GateMeta {
                description: Some(notice.description.clone()),
                minutes_remaining: Some(notice.minutes_remaining),
                retry_after_secs: Some(
                    notice.expires_at.saturating_sub(now).div_ceil(NANOS_PER_SECOND),
                ),
                ..GateMeta::default()
            },
        }
    }

    fn quota_exceeded() -> Self {
        Self {
            admit: false,
            http_status: HTTP_PAYMENT_REQUIRED,
            reason: Some(DenyReason::QuotaExceeded),
            meta: GateMeta {
                description: Some(
                    "Free message limit reached. Upgrade your plan to keep chatting.".to_string(),
                ),
                daily_remaining: Some(0),
                monthly_remaining: Some(0),
                upgrade_required: true,
                ..GateMeta::default()
            },
        }
    }

    fn unavailable() -> Self {
        Self {
            admit: false,
            http_status: HTTP_SERVICE_UNAVAILABLE,
            reason: Some(DenyReason::Unavailable),
            meta: GateMeta {
                description: Some("Service temporarily unavailable. Please retry.".to_string()),
                ..GateMeta::default()
            },
        }
    }
}

/// External systems the gate depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub subscriptions: Arc<dyn SubscriptionProvider>,
    pub store: Arc<dyn UsageCounterStore>,
    pub audit: Arc<dyn AuditLogger>,
}

impl Collaborators {
    /// Collaborators that audit through `tracing`.
    pub fn new(
        subscriptions: Arc<dyn SubscriptionProvider>,
        store: Arc<dyn UsageCounterStore>,
    ) -> Self {
        Self {
            subscriptions,
            store,
            audit: Arc::new(TracingAuditLogger),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }
}

/// Entry point for the chat endpoint.
///
/// `C` is the clock type, defaulting to SystemClock.
pub struct GatingFacade<C = SystemClock>
where
    C: Clock,
{
    detector: Arc<AbuseDetector<C>>,
    meter: Arc<UsageMeter<C>>,
    flusher: Arc<FlushCoordinator>,
    audit: Arc<dyn AuditLogger>,
    config: GateConfig,
}

impl<C> GatingFacade<C>
where
    C: Clock + Clone,
{
    /// Build the gate with fresh in-memory state.
    pub fn new(config: GateConfig, collaborators: Collaborators, clock: C) -> Result<Self, GateError> {
        config.validate()?;
        let Collaborators {
            subscriptions,
            store,
            audit,
        } = collaborators;

        let signal = Arc::new(Notify::new());
        let cache = Arc::new(UsageDeltaCache::new());

        let detector = AbuseDetector::new(
            config.abuse.clone(),
            Arc::new(ClientActivityStore::new()),
            Arc::new(BlockRegistry::new()),
            Arc::clone(&audit),
            clock.clone(),
        )?;
        let meter = UsageMeter::new(
            config.usage.clone(),
            Arc::clone(&cache),
            subscriptions,
            Arc::clone(&store),
            Arc::clone(&signal),
            Arc::clone(&audit),
            clock,
        )?;
        let flusher = FlushCoordinator::new(
            cache,
            store,
            Arc::clone(&audit),
            config.usage.flush_timeout,
            signal,
        );

        Ok(Self {
            detector: Arc::new(detector),
            meter: Arc::new(meter),
            flusher: Arc::new(flusher),
            audit,
            config,
        })
    }

    /// Decide whether the request may proceed.
    ///
    /// Never fails: an internal error denies the request.
    pub async fn evaluate(&self, client_id: &str, user_id: &str, message: &str) -> GateDecision {
        match self.try_evaluate(client_id, user_id, message).await {
            Ok(decision) => decision,
            Err(err) => {
                error!(
                    client_id = %client_id,
                    user_id = %user_id,
                    error = %err,
                    "gate evaluation failed, denying request"
                );
                GateDecision::unavailable()
            }
        }
    }

    async fn try_evaluate(
        &self,
        client_id: &str,
        user_id: &str,
        message: &str,
    ) -> Result<GateDecision, GateError> {
        // blocked clients are turned away before any collaborator I/O
        if let Some(notice) = self.detector.active_block(client_id)? {
            return Ok(GateDecision::blocked(&notice, self.detector.now()?));
        }

        let subscribed = self.meter.is_subscribed(user_id).await;
        let persisted = if subscribed {
            None
        } else {
            Some(self.meter.persisted_usage(user_id).await?)
        };

        let guard = self.detector.lock_client(client_id)?;
        let now = guard.now();
        if let AbuseVerdict::Blocked(notice) = guard.check(message) {
            return Ok(GateDecision::blocked(&notice, now));
        }

        let quota = match persisted {
            Some(persisted) => match self.meter.admit(user_id, &persisted) {
                Admission::Admitted(status) => Some(status),
                Admission::Denied(_) => return Ok(GateDecision::quota_exceeded()),
            },
            None => None,
        };

        guard.record(message);

        debug!(
            client_id = %client_id,
            user_id = %user_id,
            subscribed,
            daily_remaining = quota.map(|q| q.daily_remaining),
            "request admitted"
        );
        self.audit.log(&AuditEvent::RequestAdmitted {
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
        });
        Ok(GateDecision::admitted(quota))
    }

    /// Signal that a chat completion finished, so remaining counts shown to
    /// users catch up soon.
    pub fn on_completion(&self) {
        self.flusher.request();
    }

    /// Flush pending usage now.
    pub async fn flush(&self, force: bool) -> FlushOutcome {
        self.flusher.flush(force).await
    }

    pub fn admin(&self) -> AdminFacade<C> {
        AdminFacade::new(Arc::clone(&self.detector))
    }

    pub fn detector(&self) -> &Arc<AbuseDetector<C>> {
        &self.detector
    }

    pub fn meter(&self) -> &Arc<UsageMeter<C>> {
        &self.meter
    }

    pub fn flusher(&self) -> &Arc<FlushCoordinator> {
        &self.flusher
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}

impl<C> GatingFacade<C>
where
    C: Clock + Clone + 'static,
{
    /// Spawn the window sweep and the flush loop on the current tokio runtime.
    pub fn start(&self) -> BackgroundTasks {
        let token = CancellationToken::new();
        let mut tasks = BackgroundTasks::new(token.clone(), Arc::clone(&self.flusher));

        let detector = Arc::clone(&self.detector);
        let meter = Arc::clone(&self.meter);
        tasks.push(spawn_periodic(
            token.clone(),
            "abuse-sweep",
            self.config.abuse.sweep_interval,
            move || {
                if let Err(err) = detector.sweep() {
                    error!(error = %err, "abuse window sweep failed");
                }
                if let Err(err) = meter.prune_snapshots() {
                    error!(error = %err, "usage snapshot prune failed");
                }
            },
        ));

        tasks.push(spawn_flush_loop(
            token,
            Arc::clone(&self.flusher),
            self.config.usage.flush_interval,
        ));
        tasks
    }
}
