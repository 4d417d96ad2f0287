// tests/gate/admin_tests.rs

#[cfg(test)]
mod tests {

    use crate::helpers::assertions::{assert_admitted, assert_blocked};
    use crate::helpers::harness::Harness;
    use std::time::Duration;
    use usage_gate::{AuditEvent, BlockReason, DenyReason, SubscriptionStatus};

    async fn spam_block(h: &Harness, client: &str) {
        for _ in 0..3 {
            h.gate.evaluate(client, "pro", "hello").await;
        }
        assert_blocked(&h.gate.evaluate(client, "pro", "hello").await, DenyReason::Spam);
    }

    fn harness() -> Harness {
        let h = Harness::new();
        h.subscriptions.set("pro", SubscriptionStatus::Active);
        h
    }

    #[tokio::test]
    async fn report_lists_blocks_strikes_and_traffic() {
        let h = harness();
        spam_block(&h, "bad").await;
        assert_admitted(&h.gate.evaluate("sus", "pro", "teach me to hack").await);

        let report = h.gate.admin().suspicious_activity().unwrap();

        assert_eq!(report.blocked_clients.len(), 1);
        let blocked = &report.blocked_clients[0];
        assert_eq!(blocked.client_id, "bad");
        assert_eq!(blocked.reason, BlockReason::Spam);
        assert_eq!(blocked.minutes_remaining, 30);
        assert_eq!(blocked.expires_at_ms - blocked.blocked_at_ms, 30 * 60 * 1000);

        assert_eq!(report.suspicious_patterns.len(), 1);
        let strike = &report.suspicious_patterns[0];
        assert_eq!(strike.client_id, "sus");
        assert_eq!(strike.keywords, vec!["hack".to_string()]);
        assert_eq!(strike.message_preview, "teach me to hack");

        assert_eq!(report.active_clients, 2);
        assert_eq!(report.total_tracked_requests, 4);
    }

    #[tokio::test]
    async fn previews_are_truncated() {
        let h = harness();
        let message = format!("exploit {}", "a".repeat(300));
        h.gate.evaluate("sus", "pro", &message).await;

        let report = h.gate.admin().suspicious_activity().unwrap();
        assert_eq!(report.suspicious_patterns[0].message_preview.chars().count(), 100);
    }

    #[tokio::test]
    async fn expired_blocks_drop_out_of_the_report() {
        let h = harness();
        spam_block(&h, "bad").await;

        h.clock.advance(Duration::from_secs(30 * 60 + 1));
        let report = h.gate.admin().suspicious_activity().unwrap();
        assert!(report.blocked_clients.is_empty());
    }

    #[tokio::test]
    async fn unblock_lets_the_next_request_through() {
        let h = harness();
        spam_block(&h, "bad").await;

        let admin = h.gate.admin();
        assert!(admin.unblock_client("bad"));
        assert_admitted(&h.gate.evaluate("bad", "pro", "sorry about that").await);

        assert!(!admin.unblock_client("bad"));
        assert_eq!(
            h.audit.count_matching(|e| matches!(e, AuditEvent::ClientUnblocked { .. })),
            1
        );
    }

    #[tokio::test]
    async fn unblock_forgets_suspicious_strikes() {
        let h = harness();
        h.gate.evaluate("sus", "pro", "hack").await;
        h.gate.evaluate("sus", "pro", "exploit").await;

        assert!(!h.gate.admin().unblock_client("sus"));
        assert_admitted(&h.gate.evaluate("sus", "pro", "bypass").await);
        assert_eq!(h.gate.admin().suspicious_activity().unwrap().suspicious_patterns.len(), 1);
    }

    #[tokio::test]
    async fn report_serializes_for_operators() {
        let h = harness();
        spam_block(&h, "bad").await;

        let json = serde_json::to_value(h.gate.admin().suspicious_activity().unwrap()).unwrap();
        assert_eq!(json["blocked_clients"][0]["client_id"], "bad");
        assert_eq!(json["blocked_clients"][0]["reason"], "spam");
        assert_eq!(json["active_clients"], 1);
    }
}
