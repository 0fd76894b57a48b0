//! Inbound domain events.
//!
//! Events are immutable facts: once constructed they are only consumed, never
//! mutated. The wire envelope is `{incidentId, kind, dedupKey, payload,
//! occurredAt}`; `kind` selects the payload variant.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{AmbulanceId, DedupKey, HospitalId, IncidentId, PatientId};

/// Vital sign readings forwarded from the wearable/triage pipeline.
///
/// All fields are optional on the wire; thresholds fall back to nominal
/// values for absent readings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalSigns {
    pub heart_rate_bpm: Option<f64>,
    #[serde(rename = "spO2Percentage")]
    pub spo2_percentage: Option<f64>,
    pub body_temperature_celsius: Option<f64>,
    pub respiration_rate_bpm: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsPayload {
    pub patient_id: PatientId,
    #[serde(default)]
    pub metrics: VitalSigns,
    /// Opaque location object, forwarded untouched into dispatch commands.
    #[serde(default)]
    pub location: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriagePayload {
    pub patient_id: PatientId,
    /// Triage classification from the upstream service ("abnormal" or
    /// "emergency"); vitals thresholds can still upgrade it.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metrics: VitalSigns,
    #[serde(default)]
    pub location: Option<serde_json::Value>,
    /// Next-of-kin contact for notification commands.
    #[serde(default)]
    pub nok_contact: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSentPayload {
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchAssignedPayload {
    pub unit_id: AmbulanceId,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardPayload {
    #[serde(default)]
    pub unit_id: Option<AmbulanceId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivedPayload {
    #[serde(alias = "destHospitalId")]
    pub hospital_id: HospitalId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPayload {
    pub verified: bool,
    #[serde(default)]
    pub covered_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargedPayload {
    pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldReleasedPayload {
    pub released: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Closed set of event kinds, each carrying its typed payload.
///
/// Adding a kind extends this enum and the workflow's exhaustive match, so
/// new message types are a compile-time-checked change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum EventKind {
    VitalsCritical(VitalsPayload),
    TriageFlagged(TriagePayload),
    NotificationSent(NotificationSentPayload),
    DispatchAssigned(DispatchAssignedPayload),
    AmbulanceOnboard(OnboardPayload),
    ArrivedAtHospital(ArrivedPayload),
    BillingVerified(VerifiedPayload),
    BillingCharged(ChargedPayload),
    BillingFailed(FailedPayload),
    HoldReleased(HoldReleasedPayload),
    IncidentCancelled(CancelPayload),
}

impl EventKind {
    /// Wire name of the kind, used in logs and synthetic dedup keys.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::VitalsCritical(_) => "VitalsCritical",
            EventKind::TriageFlagged(_) => "TriageFlagged",
            EventKind::NotificationSent(_) => "NotificationSent",
            EventKind::DispatchAssigned(_) => "DispatchAssigned",
            EventKind::AmbulanceOnboard(_) => "AmbulanceOnboard",
            EventKind::ArrivedAtHospital(_) => "ArrivedAtHospital",
            EventKind::BillingVerified(_) => "BillingVerified",
            EventKind::BillingCharged(_) => "BillingCharged",
            EventKind::BillingFailed(_) => "BillingFailed",
            EventKind::HoldReleased(_) => "HoldReleased",
            EventKind::IncidentCancelled(_) => "IncidentCancelled",
        }
    }

    /// Kinds allowed to create an incident that has never been seen.
    pub fn creates_incident(&self) -> bool {
        matches!(
            self,
            EventKind::VitalsCritical(_) | EventKind::TriageFlagged(_)
        )
    }
}

/// One delivered event, decoded and ready for the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub incident_id: IncidentId,
    pub kind: EventKind,
    pub dedup_key: DedupKey,
    pub occurred_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(incident_id: impl Into<IncidentId>, kind: EventKind, dedup_key: impl Into<DedupKey>) -> Self {
        Self {
            incident_id: incident_id.into(),
            kind,
            dedup_key: dedup_key.into(),
            occurred_at: None,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_names_are_stable() {
        let kind = EventKind::ArrivedAtHospital(ArrivedPayload {
            hospital_id: HospitalId::new("H1"),
        });
        assert_eq!(kind.name(), "ArrivedAtHospital");
    }

    #[test]
    fn only_vitals_and_triage_create_incidents() {
        assert!(EventKind::VitalsCritical(VitalsPayload::default()).creates_incident());
        assert!(EventKind::TriageFlagged(TriagePayload::default()).creates_incident());
        assert!(!EventKind::NotificationSent(NotificationSentPayload::default()).creates_incident());
        assert!(!EventKind::BillingFailed(FailedPayload::default()).creates_incident());
    }

    #[test]
    fn kind_deserializes_from_tagged_wire_form() {
        let json = r#"{"kind":"DispatchAssigned","payload":{"unitId":"AMB-7","etaMinutes":4}}"#;
        let kind: EventKind = serde_json::from_str(json).unwrap();
        match kind {
            EventKind::DispatchAssigned(p) => {
                assert_eq!(p.unit_id.as_str(), "AMB-7");
                assert_eq!(p.eta_minutes, Some(4));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
