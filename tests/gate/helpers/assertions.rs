// tests/gate/helpers/assertions.rs

// dependencies
use usage_gate::{
    AbuseVerdict, BlockNotice, BlockReason, DenyReason, GateDecision, HTTP_OK,
    HTTP_PAYMENT_REQUIRED, HTTP_TOO_MANY_REQUESTS,
};

pub fn assert_admitted(decision: &GateDecision) {
    assert!(decision.admit, "expected admission, got {decision:?}");
    assert_eq!(decision.http_status, HTTP_OK);
    assert_eq!(decision.reason, None);
}

pub fn assert_blocked(decision: &GateDecision, reason: DenyReason) {
    assert!(!decision.admit, "expected a block, got {decision:?}");
    assert_eq!(decision.http_status, HTTP_TOO_MANY_REQUESTS);
    assert_eq!(decision.reason, Some(reason));
    assert!(decision.meta.description.is_some());
    assert!(decision.meta.minutes_remaining.is_some());
}

pub fn assert_quota_exceeded(decision: &GateDecision) {
    assert!(!decision.admit, "expected a quota denial, got {decision:?}");
    assert_eq!(decision.http_status, HTTP_PAYMENT_REQUIRED);
    assert_eq!(decision.reason, Some(DenyReason::QuotaExceeded));
    assert_eq!(decision.meta.daily_remaining, Some(0));
    assert_eq!(decision.meta.monthly_remaining, Some(0));
    assert!(decision.meta.upgrade_required);
}

pub fn expect_block(verdict: AbuseVerdict, reason: BlockReason) -> BlockNotice {
    match verdict {
        AbuseVerdict::Blocked(notice) => {
            assert_eq!(notice.reason, reason, "unexpected block: {notice:?}");
            notice
        }
        AbuseVerdict::Clear => panic!("expected a {reason} block, got Clear"),
    }
}
