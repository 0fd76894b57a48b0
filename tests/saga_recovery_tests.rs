//! Billing saga failure branches: compensation, escalation, cancel guards.

mod support;

use std::sync::Arc;

use serde_json::Value;

use lifeline::broker::topics;
use lifeline::collab::mock::{DecliningGateway, FixedVerifier, UnresponsiveGateway};
use lifeline::config::RetryConfig;
use lifeline::domain::{
    ArrivedPayload, BillingStatus, CancelPayload, DispatchAssignedPayload, EventKind,
    HoldReleasedPayload, OnboardPayload, Stage, TriagePayload,
};

use support::Harness;

async fn drive_to_compensating(h: &Harness, id: &str) {
    h.deliver(
        topics::TRIAGE_ACTIONABLE,
        id,
        EventKind::TriageFlagged(TriagePayload {
            patient_id: "pat-1".into(),
            status: Some("emergency".into()),
            ..Default::default()
        }),
        "t1",
    )
    .await;
    h.wait_for_stage(id, Stage::Triaged).await;
    h.deliver(
        topics::DISPATCH_STATUS,
        id,
        EventKind::DispatchAssigned(DispatchAssignedPayload {
            unit_id: "AMB-4".into(),
            eta_minutes: None,
        }),
        "d1",
    )
    .await;
    h.deliver(
        topics::DISPATCH_STATUS,
        id,
        EventKind::AmbulanceOnboard(OnboardPayload::default()),
        "o1",
    )
    .await;
    h.deliver(
        topics::DISPATCH_STATUS,
        id,
        EventKind::ArrivedAtHospital(ArrivedPayload {
            hospital_id: "H1".into(),
        }),
        "a1",
    )
    .await;

    // Verification succeeds, the charge is declined, the saga compensates.
    h.wait_for(id, |i| {
        i.billing
            .as_ref()
            .is_some_and(|s| s.status == BillingStatus::Compensating)
    })
    .await;
}

#[tokio::test]
async fn declined_charge_compensates_then_rolls_back() {
    let h = Harness::start(
        Arc::new(FixedVerifier::approving(None)),
        Arc::new(DecliningGateway::new("card declined")),
    );
    drive_to_compensating(&h, "P1").await;

    let incident = h.incident("P1").await.unwrap();
    let saga = incident.billing.as_ref().unwrap();
    assert!(saga.last_error.as_deref().unwrap().contains("card declined"));

    // StartBillingSaga plus the compensation's hold release.
    let billing = h.publisher.drain(topics::BILLING_COMMANDS);
    assert_eq!(billing.len(), 2);
    let release: Value = serde_json::from_slice(&billing[1]).unwrap();
    assert_eq!(release["command"], "ReleasePaymentHold");

    h.deliver(
        topics::BILLING_STATUS,
        "P1",
        EventKind::HoldReleased(HoldReleasedPayload {
            released: true,
            reason: None,
        }),
        "h1",
    )
    .await;
    let incident = h
        .wait_for("P1", |i| {
            i.billing
                .as_ref()
                .is_some_and(|s| s.status == BillingStatus::RolledBack)
        })
        .await;

    // Rolled back is terminal for the saga but does not close the incident.
    assert_eq!(incident.stage, Stage::BillingInitiated);
    h.stop();
}

#[tokio::test]
async fn charge_deadline_exhaustion_compensates_then_rolls_back() {
    // Every charge attempt gets a retryable 503 and the per-call deadline
    // expires before the attempt budget does.
    let retry = RetryConfig {
        max_attempts: 10,
        base_backoff_ms: 50,
        deadline_ms: 60,
    };
    let h = Harness::start(
        Arc::new(FixedVerifier::approving(None)),
        Arc::new(UnresponsiveGateway::new(retry)),
    );
    drive_to_compensating(&h, "P1").await;

    let incident = h.incident("P1").await.unwrap();
    let saga = incident.billing.as_ref().unwrap();
    assert!(saga.last_error.as_deref().unwrap().contains("deadline"));

    // The timed-out charge compensates exactly like a declined one.
    let billing = h.publisher.drain(topics::BILLING_COMMANDS);
    assert_eq!(billing.len(), 2);
    let release: Value = serde_json::from_slice(&billing[1]).unwrap();
    assert_eq!(release["command"], "ReleasePaymentHold");

    h.deliver(
        topics::BILLING_STATUS,
        "P1",
        EventKind::HoldReleased(HoldReleasedPayload {
            released: true,
            reason: None,
        }),
        "h1",
    )
    .await;
    let incident = h
        .wait_for("P1", |i| {
            i.billing
                .as_ref()
                .is_some_and(|s| s.status == BillingStatus::RolledBack)
        })
        .await;
    assert_eq!(incident.stage, Stage::BillingInitiated);
    h.stop();
}

#[tokio::test]
async fn failed_hold_release_escalates_to_operators() {
    let h = Harness::start(
        Arc::new(FixedVerifier::approving(None)),
        Arc::new(DecliningGateway::new("gateway timeout")),
    );
    drive_to_compensating(&h, "P1").await;

    h.deliver(
        topics::BILLING_STATUS,
        "P1",
        EventKind::HoldReleased(HoldReleasedPayload {
            released: false,
            reason: Some("refund rejected".into()),
        }),
        "h1",
    )
    .await;

    h.wait_for("P1", |i| {
        i.billing
            .as_ref()
            .is_some_and(|s| s.last_error.as_deref() == Some("refund rejected"))
    })
    .await;

    // Pinned in COMPENSATING, escalated for manual intervention.
    let incident = h.incident("P1").await.unwrap();
    assert_eq!(
        incident.billing.as_ref().unwrap().status,
        BillingStatus::Compensating
    );
    assert_eq!(h.publisher.len(topics::OPS_MANUAL), 1);
    let escalation: Value =
        serde_json::from_slice(&h.publisher.drain(topics::OPS_MANUAL)[0]).unwrap();
    assert_eq!(escalation["command"], "EscalateCompensation");
    assert_eq!(escalation["payload"]["reason"], "refund rejected");
    h.stop();
}

#[tokio::test]
async fn cancel_is_deferred_until_the_saga_resolves() {
    let h = Harness::start(
        Arc::new(FixedVerifier::approving(None)),
        Arc::new(DecliningGateway::new("card declined")),
    );
    drive_to_compensating(&h, "P1").await;
    let before = h.incident("P1").await.unwrap();

    // Money is still in flight: the cancel is refused.
    h.deliver(
        topics::TRIAGE_ACTIONABLE,
        "P1",
        EventKind::IncidentCancelled(CancelPayload {
            reason: Some("patient declined transport".into()),
        }),
        "c1",
    )
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let incident = h.incident("P1").await.unwrap();
    assert_eq!(incident.stage, Stage::BillingInitiated);
    assert_eq!(incident.version, before.version);

    // Once the saga rolls back, a fresh cancel abandons the incident.
    h.deliver(
        topics::BILLING_STATUS,
        "P1",
        EventKind::HoldReleased(HoldReleasedPayload {
            released: true,
            reason: None,
        }),
        "h1",
    )
    .await;
    h.wait_for("P1", |i| {
        i.billing
            .as_ref()
            .is_some_and(|s| s.status == BillingStatus::RolledBack)
    })
    .await;

    h.deliver(
        topics::TRIAGE_ACTIONABLE,
        "P1",
        EventKind::IncidentCancelled(CancelPayload { reason: None }),
        "c2",
    )
    .await;
    let incident = h.wait_for_stage("P1", Stage::Abandoned).await;
    assert!(incident.is_terminal());
    h.stop();
}
