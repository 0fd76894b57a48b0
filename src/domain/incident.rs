//! Incident record: one tracked emergency case from vitals detection through
//! billing closure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::billing::BillingSaga;
use super::ids::{AmbulanceId, HospitalId, IncidentId, PatientId};

/// Workflow stage. Ordered; an incident only moves forward through this
/// graph or into a terminal `Abandoned`, never backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    New,
    Triaged,
    Notified,
    DispatchRequested,
    Onboard,
    Arrived,
    BillingInitiated,
    Closed,
    Abandoned,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Closed | Stage::Abandoned)
    }

    /// Stable storage/wire name (SCREAMING_SNAKE_CASE).
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::New => "NEW",
            Stage::Triaged => "TRIAGED",
            Stage::Notified => "NOTIFIED",
            Stage::DispatchRequested => "DISPATCH_REQUESTED",
            Stage::Onboard => "ONBOARD",
            Stage::Arrived => "ARRIVED",
            Stage::BillingInitiated => "BILLING_INITIATED",
            Stage::Closed => "CLOSED",
            Stage::Abandoned => "ABANDONED",
        }
    }

    /// All stages, in workflow order. Used for per-stage health counts.
    pub fn all() -> &'static [Stage] {
        &[
            Stage::New,
            Stage::Triaged,
            Stage::Notified,
            Stage::DispatchRequested,
            Stage::Onboard,
            Stage::Arrived,
            Stage::BillingInitiated,
            Stage::Closed,
            Stage::Abandoned,
        ]
    }
}

/// Triage severity classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Unknown,
    Abnormal,
    Emergency,
}

/// Dispatch priority derived from severity. Changes the priority field of the
/// dispatch command, not the shape of the workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    #[default]
    Standard,
    Emergency,
}

/// One tracked emergency case.
///
/// Owned exclusively by the incident store; the state machine receives a
/// copy and returns a new value to be persisted transactionally with the
/// dedup bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: IncidentId,
    pub patient_id: PatientId,
    pub stage: Stage,
    pub severity: Severity,
    pub ambulance_id: Option<AmbulanceId>,
    pub hospital_id: Option<HospitalId>,
    #[serde(default)]
    pub location: Option<serde_json::Value>,
    #[serde(default)]
    pub nok_contact: Option<String>,
    pub billing: Option<BillingSaga>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic, incremented exactly once per accepted transition. Used for
    /// optimistic concurrency and as the charge idempotency token.
    pub version: u64,
}

impl Incident {
    pub fn new(id: IncidentId, patient_id: PatientId, stage: Stage) -> Self {
        let now = Utc::now();
        Self {
            id,
            patient_id,
            stage,
            severity: Severity::Unknown,
            ambulance_id: None,
            hospital_id: None,
            location: None,
            nok_contact: None,
            billing: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn priority(&self) -> Priority {
        match self.severity {
            Severity::Emergency => Priority::Emergency,
            Severity::Abnormal | Severity::Unknown => Priority::Standard,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_incident_starts_at_version_one() {
        let incident = Incident::new("P1".into(), "patient-1".into(), Stage::New);
        assert_eq!(incident.version, 1);
        assert_eq!(incident.stage, Stage::New);
        assert!(incident.billing.is_none());
    }

    #[test]
    fn priority_tracks_severity() {
        let mut incident = Incident::new("P1".into(), "patient-1".into(), Stage::Triaged);
        assert_eq!(incident.priority(), Priority::Standard);
        incident.severity = Severity::Emergency;
        assert_eq!(incident.priority(), Priority::Emergency);
    }

    #[test]
    fn stage_names_match_wire_form() {
        assert_eq!(Stage::DispatchRequested.as_str(), "DISPATCH_REQUESTED");
        let json = serde_json::to_string(&Stage::BillingInitiated).unwrap();
        assert_eq!(json, "\"BILLING_INITIATED\"");
    }

    #[test]
    fn terminal_stages() {
        assert!(Stage::Closed.is_terminal());
        assert!(Stage::Abandoned.is_terminal());
        assert!(!Stage::BillingInitiated.is_terminal());
    }
}
