//! End-to-end incident lifecycle through the running dispatcher.

mod support;

use std::sync::Arc;

use rust_decimal_macros::dec;
use serde_json::Value;

use lifeline::broker::topics;
use lifeline::collab::mock::{FixedVerifier, RecordingGateway};
use lifeline::domain::{
    ArrivedPayload, BillingStatus, DispatchAssignedPayload, EventKind, NotificationSentPayload,
    OnboardPayload, Severity, Stage, TriagePayload, VitalSigns,
};

use support::Harness;

fn triage(status: &str) -> EventKind {
    EventKind::TriageFlagged(TriagePayload {
        patient_id: "pat-9".into(),
        status: Some(status.into()),
        metrics: VitalSigns {
            spo2_percentage: Some(88.0),
            heart_rate_bpm: Some(142.0),
            ..Default::default()
        },
        location: Some(serde_json::json!({"lat": 1.35, "lon": 103.82})),
        nok_contact: Some("+6590000000".into()),
    })
}

#[tokio::test]
async fn happy_path_reaches_closed_with_paid_saga() {
    let gateway = Arc::new(RecordingGateway::new());
    let h = Harness::start(
        Arc::new(FixedVerifier::approving(Some(dec!(80)))),
        gateway.clone(),
    );

    h.deliver(topics::TRIAGE_ACTIONABLE, "P123", triage("emergency"), "t1")
        .await;
    let incident = h.wait_for_stage("P123", Stage::Triaged).await;
    assert_eq!(incident.severity, Severity::Emergency);
    assert_eq!(incident.version, 1);

    h.deliver(
        topics::DISPATCH_STATUS,
        "P123",
        EventKind::NotificationSent(NotificationSentPayload::default()),
        "n1",
    )
    .await;
    h.wait_for_stage("P123", Stage::Notified).await;

    h.deliver(
        topics::DISPATCH_STATUS,
        "P123",
        EventKind::DispatchAssigned(DispatchAssignedPayload {
            unit_id: "AMB-7".into(),
            eta_minutes: Some(4),
        }),
        "d1",
    )
    .await;
    let incident = h.wait_for_stage("P123", Stage::DispatchRequested).await;
    assert_eq!(incident.ambulance_id.as_ref().unwrap().as_str(), "AMB-7");

    h.deliver(
        topics::DISPATCH_STATUS,
        "P123",
        EventKind::AmbulanceOnboard(OnboardPayload::default()),
        "o1",
    )
    .await;
    h.wait_for_stage("P123", Stage::Onboard).await;

    // Arrival initiates billing; the saga then runs to PAID through the
    // collaborator doubles without further deliveries.
    h.deliver(
        topics::DISPATCH_STATUS,
        "P123",
        EventKind::ArrivedAtHospital(ArrivedPayload {
            hospital_id: "H9".into(),
        }),
        "a1",
    )
    .await;
    let incident = h.wait_for_stage("P123", Stage::Closed).await;

    assert_eq!(incident.version, 7);
    assert_eq!(incident.hospital_id.as_ref().unwrap().as_str(), "H9");
    let saga = incident.billing.as_ref().unwrap();
    assert_eq!(saga.status, BillingStatus::Paid);
    assert_eq!(saga.amount, dec!(80));
    assert_eq!(saga.payment_reference.as_deref(), Some("ch_P123"));

    // One charge, keyed by the incident version at charge issuance.
    assert_eq!(gateway.charged_keys(), vec!["P123/ChargePayment/6"]);

    // Outbound command topics saw exactly the lifecycle's commands.
    assert_eq!(h.publisher.len(topics::NOTIFICATION_COMMANDS), 1);
    assert_eq!(h.publisher.len(topics::DISPATCH_COMMANDS), 1);
    assert_eq!(h.publisher.len(topics::BILLING_COMMANDS), 1);

    let dispatch = h.publisher.drain(topics::DISPATCH_COMMANDS);
    let value: Value = serde_json::from_slice(&dispatch[0]).unwrap();
    assert_eq!(value["command"], "RequestDispatch");
    assert_eq!(value["payload"]["priority"], "EMERGENCY");
    h.stop();
}

#[tokio::test]
async fn dispatch_can_overtake_notification_ack() {
    let h = Harness::start(
        Arc::new(FixedVerifier::approving(None)),
        Arc::new(RecordingGateway::new()),
    );

    h.deliver(topics::TRIAGE_ACTIONABLE, "P2", triage("abnormal"), "t1")
        .await;
    h.wait_for_stage("P2", Stage::Triaged).await;

    // The notification ack never arrives; assignment still advances.
    h.deliver(
        topics::DISPATCH_STATUS,
        "P2",
        EventKind::DispatchAssigned(DispatchAssignedPayload {
            unit_id: "AMB-1".into(),
            eta_minutes: None,
        }),
        "d1",
    )
    .await;
    let incident = h.wait_for_stage("P2", Stage::DispatchRequested).await;
    assert_eq!(incident.version, 2);
    h.stop();
}

#[tokio::test]
async fn verification_decline_fails_saga_without_charging() {
    let gateway = Arc::new(RecordingGateway::new());
    let h = Harness::start(Arc::new(FixedVerifier::rejecting()), gateway.clone());

    h.deliver(topics::TRIAGE_ACTIONABLE, "P3", triage("emergency"), "t1")
        .await;
    h.wait_for_stage("P3", Stage::Triaged).await;
    h.deliver(
        topics::DISPATCH_STATUS,
        "P3",
        EventKind::DispatchAssigned(DispatchAssignedPayload {
            unit_id: "AMB-2".into(),
            eta_minutes: None,
        }),
        "d1",
    )
    .await;
    h.deliver(
        topics::DISPATCH_STATUS,
        "P3",
        EventKind::AmbulanceOnboard(OnboardPayload::default()),
        "o1",
    )
    .await;
    h.deliver(
        topics::DISPATCH_STATUS,
        "P3",
        EventKind::ArrivedAtHospital(ArrivedPayload {
            hospital_id: "H1".into(),
        }),
        "a1",
    )
    .await;

    let incident = h
        .wait_for("P3", |i| {
            i.billing
                .as_ref()
                .is_some_and(|s| s.status == BillingStatus::Failed)
        })
        .await;

    // The incident stays parked in BILLING_INITIATED; nothing was charged.
    assert_eq!(incident.stage, Stage::BillingInitiated);
    assert!(gateway.charged_keys().is_empty());
    h.stop();
}

#[tokio::test]
async fn distinct_incidents_progress_independently() {
    let h = Harness::start(
        Arc::new(FixedVerifier::approving(None)),
        Arc::new(RecordingGateway::new()),
    );

    h.deliver(topics::TRIAGE_ACTIONABLE, "PA", triage("abnormal"), "a-t1")
        .await;
    h.deliver(topics::TRIAGE_ACTIONABLE, "PB", triage("emergency"), "b-t1")
        .await;

    let a = h.wait_for_stage("PA", Stage::Triaged).await;
    let b = h.wait_for_stage("PB", Stage::Triaged).await;
    assert_eq!(a.version, 1);
    assert_eq!(b.version, 1);
    assert_eq!(h.publisher.len(topics::DISPATCH_COMMANDS), 2);
    h.stop();
}
