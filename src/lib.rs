// src/lib.rs

//! # Usage Gate
//!
//! Admission control for chat requests: per-client abuse detection with
//! temporary blocks, and free-tier usage metering through an in-memory delta
//! cache that is flushed to a durable counter store in batches.
//!
//! ## Quick Example
//!
//! ```rust
//! use std::sync::Arc;
//! use usage_gate::{Collaborators, GateConfig, GatingFacade, InMemoryUsageStore,
//!                  StaticSubscriptions, SystemClock};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let collaborators = Collaborators::new(
//!     Arc::new(StaticSubscriptions::new()),
//!     Arc::new(InMemoryUsageStore::new(SystemClock)),
//! );
//! let gate = GatingFacade::new(GateConfig::default(), collaborators, SystemClock).unwrap();
//!
//! let decision = gate.evaluate("203.0.113.7", "user_123", "hello").await;
//! if decision.admit {
//!     println!("{} free messages left today", decision.meta.daily_remaining.unwrap_or(0));
//! } else {
//!     println!("denied with status {}", decision.http_status);
//! }
//! # }
//! ```

// private modules
mod activity;
mod admin;
mod blocks;
mod clock;
mod collaborators;
mod config;
mod detector;
mod errors;
mod flush;
mod gate;
mod memory;
mod scheduler;
mod usage;

// public API exports
pub use activity::{ClientActivity, ClientActivityStore, RecentMessage, SuspiciousPattern};
pub use admin::{AdminFacade, BlockedClient, SuspiciousActivityReport, SuspiciousEntry};
pub use blocks::{BlockEntry, BlockReason, BlockRegistry};
pub use clock::{Clock, ClockError, SystemClock};
pub use collaborators::{
    AuditEvent, AuditLogger, PersistedUsage, SubscriptionProvider, SubscriptionStatus,
    TracingAuditLogger, UsageCounterStore, UsageDeltaRecord,
};
pub use config::{AbuseConfig, GateConfig, MAX_BLOCK_DURATION, UsageConfig};
pub use detector::{AbuseDetector, AbuseVerdict, BlockNotice, ClientGuard, SweepStats};
pub use errors::GateError;
pub use flush::{FlushCoordinator, FlushOutcome};
pub use gate::{
    Collaborators, DenyReason, GateDecision, GateMeta, GatingFacade, HTTP_OK,
    HTTP_PAYMENT_REQUIRED, HTTP_SERVICE_UNAVAILABLE, HTTP_TOO_MANY_REQUESTS,
};
pub use memory::{CounterRow, InMemoryUsageStore, StaticSubscriptions};
pub use scheduler::BackgroundTasks;
pub use usage::{Admission, UsageDelta, UsageDeltaCache, UsageMeter, UsageStatus};
