//! Wire codec for inbound events and outbound commands.
//!
//! Inbound messages are JSON envelopes `{incidentId, kind, dedupKey, payload,
//! occurredAt}`. Anything that fails to decode here never reaches the state
//! machine; the dispatcher moves it to the dead-letter topic.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::domain::{Command, Event, EventKind};
use crate::error::CodecError;

const KIND_NAMES: &[&str] = &[
    "VitalsCritical",
    "TriageFlagged",
    "NotificationSent",
    "DispatchAssigned",
    "AmbulanceOnboard",
    "ArrivedAtHospital",
    "BillingVerified",
    "BillingCharged",
    "BillingFailed",
    "HoldReleased",
    "IncidentCancelled",
];

/// Decode one inbound delivery into a typed event.
pub fn decode_event(topic: &str, payload: &[u8]) -> Result<Event, CodecError> {
    let value: Value = serde_json::from_slice(payload).map_err(CodecError::Json)?;

    let incident_id = value
        .get("incidentId")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingField {
            kind: "envelope",
            field: "incidentId",
        })?
        .to_string();
    if incident_id.is_empty() {
        return Err(CodecError::EmptyIncidentId);
    }

    let kind_name = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingField {
            kind: "envelope",
            field: "kind",
        })?;
    if !KIND_NAMES.contains(&kind_name) {
        return Err(CodecError::UnknownKind {
            topic: topic.to_string(),
            kind: kind_name.to_string(),
        });
    }

    let dedup_key = value
        .get("dedupKey")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingField {
            kind: "envelope",
            field: "dedupKey",
        })?
        .to_string();
    if dedup_key.is_empty() {
        return Err(CodecError::EmptyDedupKey { incident_id });
    }

    let occurred_at = value
        .get("occurredAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let tagged = json!({
        "kind": kind_name,
        "payload": value.get("payload").cloned().unwrap_or_else(|| json!({})),
    });
    let kind: EventKind =
        serde_json::from_value(tagged).map_err(CodecError::Json)?;

    Ok(Event {
        incident_id: incident_id.into(),
        kind,
        dedup_key: dedup_key.into(),
        occurred_at,
        received_at: Utc::now(),
    })
}

/// Encode an event into its wire envelope. Used by the loopback broker's
/// injection side and by tests.
pub fn encode_event(event: &Event) -> Result<Vec<u8>, CodecError> {
    let tagged = serde_json::to_value(&event.kind).map_err(CodecError::Json)?;
    let mut envelope = json!({
        "incidentId": event.incident_id.as_str(),
        "dedupKey": event.dedup_key.as_str(),
    });
    if let Some(occurred_at) = event.occurred_at {
        envelope["occurredAt"] = json!(occurred_at.to_rfc3339());
    }
    if let Value::Object(fields) = tagged {
        for (key, val) in fields {
            envelope[key] = val;
        }
    }
    serde_json::to_vec(&envelope).map_err(CodecError::Json)
}

/// Encode an outbound command envelope `{incidentId, command, payload,
/// idempotencyKey}`.
pub fn encode_command(command: &Command) -> Result<Vec<u8>, CodecError> {
    let tagged = serde_json::to_value(&command.kind).map_err(CodecError::Json)?;
    let mut envelope = json!({
        "incidentId": command.incident_id.as_str(),
        "idempotencyKey": command.idempotency_key(),
    });
    if let Value::Object(fields) = tagged {
        for (key, val) in fields {
            envelope[key] = val;
        }
    }
    serde_json::to_vec(&envelope).map_err(CodecError::Json)
}

/// Wrap a rejected delivery for the dead-letter topic, preserving the
/// original bytes for inspection.
pub fn dead_letter(topic: &str, payload: &[u8], error: &CodecError) -> Vec<u8> {
    let original: Value = serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
    serde_json::to_vec(&json!({
        "topic": topic,
        "error": error.to_string(),
        "rejectedAt": Utc::now().to_rfc3339(),
        "original": original,
    }))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::topics;
    use crate::domain::{ArrivedPayload, CommandKind, IncidentId, RequestDispatchPayload, Priority};

    #[test]
    fn decodes_triage_flagged_envelope() {
        let raw = br#"{
            "incidentId": "P123",
            "kind": "TriageFlagged",
            "dedupKey": "triage-1",
            "occurredAt": "2026-03-01T10:00:00Z",
            "payload": {
                "patientId": "pat-9",
                "status": "emergency",
                "metrics": {"spO2Percentage": 88.0, "heartRateBpm": 140.0},
                "location": {"lat": 1.35, "lon": 103.82}
            }
        }"#;
        let event = decode_event(topics::TRIAGE_ACTIONABLE, raw).unwrap();
        assert_eq!(event.incident_id.as_str(), "P123");
        assert_eq!(event.dedup_key.as_str(), "triage-1");
        assert!(event.occurred_at.is_some());
        match event.kind {
            EventKind::TriageFlagged(p) => {
                assert_eq!(p.patient_id.as_str(), "pat-9");
                assert_eq!(p.metrics.spo2_percentage, Some(88.0));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected_with_topic() {
        let raw = br#"{"incidentId":"P1","kind":"Telemetry","dedupKey":"k1","payload":{}}"#;
        let err = decode_event(topics::DISPATCH_STATUS, raw).unwrap_err();
        match err {
            CodecError::UnknownKind { topic, kind } => {
                assert_eq!(topic, topics::DISPATCH_STATUS);
                assert_eq!(kind, "Telemetry");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_dedup_key_is_rejected() {
        let raw = br#"{"incidentId":"P1","kind":"NotificationSent","payload":{}}"#;
        assert!(matches!(
            decode_event(topics::TRIAGE_ACTIONABLE, raw),
            Err(CodecError::MissingField { field: "dedupKey", .. })
        ));
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(
            decode_event(topics::TRIAGE_ACTIONABLE, b"not json"),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn event_round_trips_through_envelope() {
        let event = Event::new(
            "P42",
            EventKind::ArrivedAtHospital(ArrivedPayload {
                hospital_id: "H9".into(),
            }),
            "arrive-1",
        );
        let bytes = encode_event(&event).unwrap();
        let decoded = decode_event(topics::DISPATCH_STATUS, &bytes).unwrap();
        assert_eq!(decoded.incident_id, event.incident_id);
        assert_eq!(decoded.kind, event.kind);
        assert_eq!(decoded.dedup_key, event.dedup_key);
    }

    #[test]
    fn command_envelope_carries_idempotency_key() {
        let command = Command::new(
            IncidentId::new("P123"),
            2,
            CommandKind::RequestDispatch(RequestDispatchPayload {
                patient_id: "pat-9".into(),
                location: None,
                priority: Priority::Emergency,
            }),
        );
        let bytes = encode_command(&command).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["incidentId"], "P123");
        assert_eq!(value["command"], "RequestDispatch");
        assert_eq!(value["idempotencyKey"], "P123/RequestDispatch/2");
        assert_eq!(value["payload"]["priority"], "EMERGENCY");
    }

    #[test]
    fn dead_letter_preserves_original_payload() {
        let raw = br#"{"incidentId":"P1","kind":"Telemetry","dedupKey":"k1"}"#;
        let err = decode_event(topics::TRIAGE_ACTIONABLE, raw).unwrap_err();
        let parked = dead_letter(topics::TRIAGE_ACTIONABLE, raw, &err);
        let value: Value = serde_json::from_slice(&parked).unwrap();
        assert_eq!(value["topic"], topics::TRIAGE_ACTIONABLE);
        assert_eq!(value["original"]["kind"], "Telemetry");
        assert!(value["error"].as_str().unwrap().contains("Telemetry"));
    }
}
