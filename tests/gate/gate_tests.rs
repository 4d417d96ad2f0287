// tests/gate/gate_tests.rs

#[cfg(test)]
mod tests {

    use crate::helpers::assertions::{assert_admitted, assert_blocked, assert_quota_exceeded};
    use crate::helpers::harness::Harness;
    use std::sync::Arc;
    use usage_gate::{
        AbuseConfig, AuditEvent, BlockReason, Collaborators, DenyReason, GateConfig, GateError,
        GatingFacade, HTTP_SERVICE_UNAVAILABLE, InMemoryUsageStore, StaticSubscriptions,
        SubscriptionStatus, SystemClock, UsageDelta,
    };

    #[tokio::test]
    async fn abuse_is_checked_before_quota() {
        let h = Harness::new();
        h.store.set_usage("broke", 5, 5);

        let decision = h.gate.evaluate("10.3.0.1", "broke", &"x".repeat(2001)).await;
        assert_blocked(&decision, DenyReason::MessageTooLong);

        // the block now applies to anything from that client
        assert_blocked(
            &h.gate.evaluate("10.3.0.1", "broke", "short").await,
            DenyReason::MessageTooLong,
        );
        assert_quota_exceeded(&h.gate.evaluate("10.3.0.2", "broke", "short").await);
    }

    #[tokio::test]
    async fn subscribers_are_still_subject_to_abuse_rules() {
        let h = Harness::new();
        h.subscriptions.set("pro", SubscriptionStatus::Active);

        for _ in 0..3 {
            assert_admitted(&h.gate.evaluate("10.3.0.3", "pro", "hello").await);
        }
        assert_blocked(&h.gate.evaluate("10.3.0.3", "pro", "hello").await, DenyReason::Spam);
    }

    #[tokio::test]
    async fn internal_errors_deny_with_unavailable() {
        let h = Harness::new();

        h.clock.fail_next_call();
        let decision = h.gate.evaluate("10.3.0.4", "u1", "hello").await;
        assert!(!decision.admit);
        assert_eq!(decision.http_status, HTTP_SERVICE_UNAVAILABLE);
        assert_eq!(decision.reason, Some(DenyReason::Unavailable));
        assert!(!h.gate.meter().cache().contains("u1"));

        assert_admitted(&h.gate.evaluate("10.3.0.4", "u1", "hello").await);
    }

    #[tokio::test]
    async fn quota_denials_are_not_recorded_as_activity() {
        let h = Harness::new();
        h.store.set_usage("broke", 5, 5);

        // would be spam if the denied requests counted
        for _ in 0..5 {
            assert_quota_exceeded(&h.gate.evaluate("10.3.0.5", "broke", "hello").await);
        }

        let report = h.gate.admin().suspicious_activity().unwrap();
        assert_eq!(report.total_tracked_requests, 0);
        assert!(report.blocked_clients.is_empty());
    }

    #[tokio::test]
    async fn blocked_requests_do_not_consume_quota() {
        let h = Harness::new();

        assert_blocked(
            &h.gate.evaluate("10.3.0.6", "u2", &"x".repeat(2001)).await,
            DenyReason::MessageTooLong,
        );
        assert!(!h.gate.meter().cache().contains("u2"));
    }

    #[tokio::test]
    async fn decisions_serialize_without_internal_state() {
        let h = Harness::new();

        let admitted = serde_json::to_value(h.gate.evaluate("10.3.0.7", "u3", "hello").await).unwrap();
        assert_eq!(admitted["admit"], true);
        assert_eq!(admitted["http_status"], 200);
        assert!(admitted.get("reason").is_none());
        assert_eq!(admitted["meta"]["daily_remaining"], 4);

        h.gate.evaluate("10.3.0.7", "u3", "hello").await;
        h.gate.evaluate("10.3.0.7", "u3", "hello").await;
        let blocked = serde_json::to_value(h.gate.evaluate("10.3.0.7", "u3", "hello").await).unwrap();
        assert_eq!(blocked["admit"], false);
        assert_eq!(blocked["http_status"], 429);
        assert_eq!(blocked["reason"], "spam");
        assert_eq!(blocked["meta"]["minutes_remaining"], 30);
        assert!(blocked["meta"].get("daily_remaining").is_none());
    }

    #[tokio::test]
    async fn admissions_and_blocks_are_audited() {
        let h = Harness::new();

        for _ in 0..4 {
            h.gate.evaluate("10.3.0.8", "u4", "hello").await;
        }

        assert_eq!(
            h.audit.count_matching(|e| matches!(e, AuditEvent::RequestAdmitted { .. })),
            3
        );
        let blocks: Vec<AuditEvent> = h
            .audit
            .events()
            .into_iter()
            .filter(|e| matches!(e, AuditEvent::ClientBlocked { .. }))
            .collect();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(
            &blocks[0],
            AuditEvent::ClientBlocked { client_id, reason: BlockReason::Spam, .. } if client_id == "10.3.0.8"
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_exceed_the_free_limit() {
        let Harness { gate, .. } = Harness::new();
        let gate = Arc::new(gate);

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.evaluate(&format!("10.4.0.{i}"), "shared", "hello").await
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().admit {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
        assert_eq!(gate.meter().cache().pending("shared"), UsageDelta { daily: 5, monthly: 5 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_from_one_client_respect_the_minute_limit() {
        let Harness { gate, subscriptions, .. } = Harness::new();
        subscriptions.set("pro", SubscriptionStatus::Active);
        let gate = Arc::new(gate);

        let handles: Vec<_> = (0..30)
            .map(|i| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.evaluate("10.5.0.1", "pro", &format!("question {i}")).await
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().admit {
                admitted += 1;
            }
        }
        // the window may hold 10 before a check, so the 11th still passes
        assert_eq!(admitted, 11);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = GateConfig {
            abuse: AbuseConfig::default().max_message_length(0),
            ..GateConfig::default()
        };
        let collaborators = Collaborators::new(
            Arc::new(StaticSubscriptions::new()),
            Arc::new(InMemoryUsageStore::new(SystemClock)),
        );

        let result = GatingFacade::new(config, collaborators, SystemClock);
        assert!(matches!(result, Err(GateError::InvalidConfig(_))));
    }
}
