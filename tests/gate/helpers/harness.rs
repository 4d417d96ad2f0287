// tests/gate/helpers/harness.rs

// dependencies
use std::sync::Arc;
use usage_gate::{
    Collaborators, GateConfig, GatingFacade, StaticSubscriptions, SubscriptionProvider,
};

use crate::fixtures::collaborators::{FlakyStore, RecordingAudit};
use crate::fixtures::test_clock::TestClock;

// A gate wired to fakes that tests can reach into
pub struct Harness {
    pub gate: GatingFacade<TestClock>,
    pub clock: TestClock,
    pub store: Arc<FlakyStore>,
    pub subscriptions: Arc<StaticSubscriptions>,
    pub audit: Arc<RecordingAudit>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(GateConfig::default())
    }

    pub fn with_config(config: GateConfig) -> Self {
        let subscriptions = Arc::new(StaticSubscriptions::new());
        Self::build(config, Arc::clone(&subscriptions) as Arc<dyn SubscriptionProvider>, subscriptions)
    }

    // Gate that asks `provider` for subscription status instead of the static map
    pub fn with_provider(config: GateConfig, provider: Arc<dyn SubscriptionProvider>) -> Self {
        Self::build(config, provider, Arc::new(StaticSubscriptions::new()))
    }

    fn build(
        config: GateConfig,
        provider: Arc<dyn SubscriptionProvider>,
        subscriptions: Arc<StaticSubscriptions>,
    ) -> Self {
        let clock = TestClock::new();
        let store = Arc::new(FlakyStore::new(clock.clone()));
        let audit = Arc::new(RecordingAudit::default());
        let collaborators = Collaborators::new(provider, Arc::clone(&store) as _)
            .with_audit(Arc::clone(&audit) as _);
        let gate = GatingFacade::new(config, collaborators, clock.clone()).unwrap();
        Self {
            gate,
            clock,
            store,
            subscriptions,
            audit,
        }
    }
}
