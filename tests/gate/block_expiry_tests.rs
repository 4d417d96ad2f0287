// tests/gate/block_expiry_tests.rs

#[cfg(test)]
mod tests {

    use crate::fixtures::test_clock::TestClock;
    use crate::helpers::assertions::{assert_admitted, assert_blocked, expect_block};
    use crate::helpers::harness::Harness;
    use std::time::Duration;
    use usage_gate::{AbuseConfig, AbuseDetector, BlockReason, DenyReason, MAX_BLOCK_DURATION};

    const THIRTY_MINUTES: Duration = Duration::from_secs(30 * 60);

    fn spam_block(detector: &AbuseDetector<TestClock>, client: &str) {
        for _ in 0..3 {
            detector.record_activity(client, "hello").unwrap();
        }
        expect_block(detector.check(client, "hello").unwrap(), BlockReason::Spam);
    }

    #[test]
    fn block_holds_until_it_expires() {
        let clock = TestClock::new();
        let detector = AbuseDetector::with_config(AbuseConfig::default(), clock.clone()).unwrap();
        let t0 = clock.now_nanos();
        spam_block(&detector, "10.1.0.1");

        let notice = detector.active_block("10.1.0.1").unwrap().unwrap();
        assert_eq!(notice.expires_at, t0 + THIRTY_MINUTES.as_nanos() as u64);

        clock.advance(THIRTY_MINUTES - Duration::from_secs(1));
        let notice = expect_block(
            detector.check("10.1.0.1", "something new").unwrap(),
            BlockReason::Spam,
        );
        assert_eq!(notice.minutes_remaining, 1);

        clock.advance(Duration::from_secs(2));
        assert!(detector.active_block("10.1.0.1").unwrap().is_none());
        assert!(!detector.check("10.1.0.1", "something new").unwrap().is_blocked());
    }

    #[test]
    fn block_is_still_in_force_at_its_expiry_instant() {
        let clock = TestClock::new();
        let detector = AbuseDetector::with_config(AbuseConfig::default(), clock.clone()).unwrap();
        spam_block(&detector, "10.1.0.2");

        clock.advance(THIRTY_MINUTES);
        assert!(detector.active_block("10.1.0.2").unwrap().is_some());
    }

    #[test]
    fn configured_block_duration_is_used() {
        let clock = TestClock::new();
        let config = AbuseConfig::default().block_duration(Duration::from_secs(5 * 60));
        let detector = AbuseDetector::with_config(config, clock.clone()).unwrap();
        spam_block(&detector, "10.1.0.3");

        let notice = detector.active_block("10.1.0.3").unwrap().unwrap();
        assert_eq!(notice.minutes_remaining, 5);

        clock.advance(Duration::from_secs(5 * 60 + 1));
        assert!(detector.active_block("10.1.0.3").unwrap().is_none());
    }

    #[test]
    fn longest_allowed_block_lasts_its_full_duration() {
        let clock = TestClock::new();
        let config = AbuseConfig::default().block_duration(MAX_BLOCK_DURATION);
        let detector = AbuseDetector::with_config(config, clock.clone()).unwrap();
        spam_block(&detector, "10.1.0.7");

        let notice = detector.active_block("10.1.0.7").unwrap().unwrap();
        assert_eq!(notice.minutes_remaining, 7 * 24 * 60);

        clock.advance(MAX_BLOCK_DURATION - Duration::from_secs(1));
        assert!(detector.active_block("10.1.0.7").unwrap().is_some());
    }

    #[test]
    fn oversized_block_duration_is_rejected() {
        let config = AbuseConfig::default().block_duration(Duration::from_secs(u64::MAX));
        assert!(AbuseDetector::with_config(config, TestClock::new()).is_err());
    }

    #[test]
    fn sweep_drops_expired_blocks_and_idle_clients() {
        let clock = TestClock::new();
        let detector = AbuseDetector::with_config(AbuseConfig::default(), clock.clone()).unwrap();
        spam_block(&detector, "10.1.0.4");
        detector.record_activity("10.1.0.5", "hi").unwrap();

        clock.advance(THIRTY_MINUTES + Duration::from_secs(1));
        let stats = detector.sweep().unwrap();
        assert_eq!(stats.expired_blocks, 1);
        assert_eq!(stats.evicted_clients, 0);
        assert!(detector.blocks().is_empty());

        clock.advance(THIRTY_MINUTES);
        let stats = detector.sweep().unwrap();
        assert_eq!(stats.evicted_clients, 2);
        assert_eq!(detector.activity().tracked_clients(), 0);
    }

    #[tokio::test]
    async fn gate_reports_remaining_block_time() {
        let h = Harness::new();
        for _ in 0..3 {
            assert_admitted(&h.gate.evaluate("10.1.0.6", "u1", "hello").await);
        }

        let decision = h.gate.evaluate("10.1.0.6", "u1", "hello").await;
        assert_blocked(&decision, DenyReason::Spam);
        assert_eq!(decision.meta.minutes_remaining, Some(30));
        assert_eq!(decision.meta.retry_after_secs, Some(30 * 60));

        h.clock.advance(Duration::from_secs(10 * 60 + 30));
        let decision = h.gate.evaluate("10.1.0.6", "u1", "different").await;
        assert_blocked(&decision, DenyReason::Spam);
        assert_eq!(decision.meta.minutes_remaining, Some(20));
        assert_eq!(decision.meta.retry_after_secs, Some(19 * 60 + 30));
    }
}
