//! Database model types for Diesel ORM.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{dedup_entries, incidents};
use crate::domain::{BillingSaga, Incident, Severity, Stage};
use crate::error::StoreError;

/// Database row for an incident. Stage/severity/billing are stored in their
/// serde wire forms so the row survives enum additions without a migration.
#[derive(Queryable, Selectable, Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = incidents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IncidentRow {
    pub id: String,
    pub patient_id: String,
    pub stage: String,
    pub severity: String,
    pub ambulance_id: Option<String>,
    pub hospital_id: Option<String>,
    pub location: Option<String>,
    pub nok_contact: Option<String>,
    pub billing: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

impl IncidentRow {
    pub fn from_incident(incident: &Incident) -> Result<Self, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptRecord {
            incident_id: incident.id.clone(),
            reason,
        };
        let billing = incident
            .billing
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        let location = incident
            .location
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;
        Ok(Self {
            id: incident.id.to_string(),
            patient_id: incident.patient_id.to_string(),
            stage: incident.stage.as_str().to_string(),
            severity: serde_json::to_value(incident.severity)
                .map_err(|e| corrupt(e.to_string()))?
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            ambulance_id: incident.ambulance_id.as_ref().map(ToString::to_string),
            hospital_id: incident.hospital_id.as_ref().map(ToString::to_string),
            location,
            nok_contact: incident.nok_contact.clone(),
            billing,
            created_at: incident.created_at.to_rfc3339(),
            updated_at: incident.updated_at.to_rfc3339(),
            version: incident.version as i64,
        })
    }

    pub fn into_incident(self) -> Result<Incident, StoreError> {
        let incident_id = crate::domain::IncidentId::new(self.id.clone());
        let corrupt = |reason: String| StoreError::CorruptRecord {
            incident_id: incident_id.clone(),
            reason,
        };

        let stage: Stage = serde_json::from_value(serde_json::Value::String(self.stage.clone()))
            .map_err(|e| corrupt(format!("stage '{}': {e}", self.stage)))?;
        let severity: Severity =
            serde_json::from_value(serde_json::Value::String(self.severity.clone()))
                .map_err(|e| corrupt(format!("severity '{}': {e}", self.severity)))?;
        let billing: Option<BillingSaga> = self
            .billing
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("billing: {e}")))?;
        let location: Option<serde_json::Value> = self
            .location
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("location: {e}")))?;
        let created_at = parse_ts(&self.created_at).map_err(&corrupt)?;
        let updated_at = parse_ts(&self.updated_at).map_err(&corrupt)?;

        Ok(Incident {
            id: incident_id,
            patient_id: self.patient_id.into(),
            stage,
            severity,
            ambulance_id: self.ambulance_id.map(Into::into),
            hospital_id: self.hospital_id.map(Into::into),
            location,
            nok_contact: self.nok_contact,
            billing,
            created_at,
            updated_at,
            version: self.version as u64,
        })
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("timestamp '{raw}': {e}"))
}

/// Database row for one applied dedup key.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = dedup_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DedupRow {
    pub dedup_key: String,
    pub incident_id: String,
    pub applied_at: String,
}

impl DedupRow {
    pub fn new(dedup_key: &str, incident_id: &str) -> Self {
        Self {
            dedup_key: dedup_key.to_string(),
            incident_id: incident_id.to_string(),
            applied_at: Utc::now().to_rfc3339(),
        }
    }
}
