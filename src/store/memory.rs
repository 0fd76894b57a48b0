//! In-memory store implementation for local runs and testing.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::IncidentStore;
use crate::domain::{DedupKey, Incident, IncidentId, Stage};
use crate::error::{Result, StoreError};

#[derive(Debug, Default)]
struct Inner {
    incidents: HashMap<IncidentId, Incident>,
    dedup: HashMap<DedupKey, DateTime<Utc>>,
}

/// In-memory incident store. One mutex over both maps gives the same
/// check-and-mark atomicity the SQL transaction provides.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn load(&self, id: &IncidentId) -> Result<Option<Incident>> {
        Ok(self.inner.lock().incidents.get(id).cloned())
    }

    async fn is_applied(&self, key: &DedupKey) -> Result<bool> {
        Ok(self.inner.lock().dedup.contains_key(key))
    }

    async fn commit(&self, incident: &Incident, key: &DedupKey) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.dedup.contains_key(key) {
            // Replay of an applied event: silent no-op.
            return Ok(());
        }

        let stored = inner.incidents.get(&incident.id).map(|i| i.version);
        let expected = stored.map_or(1, |v| v + 1);
        if incident.version != expected {
            return Err(StoreError::VersionConflict {
                incident_id: incident.id.clone(),
                stored: stored.unwrap_or(0),
                attempted: incident.version,
            }
            .into());
        }

        inner.incidents.insert(incident.id.clone(), incident.clone());
        inner.dedup.insert(key.clone(), Utc::now());
        Ok(())
    }

    async fn mark_applied(&self, _incident_id: &IncidentId, key: &DedupKey) -> Result<()> {
        self.inner.lock().dedup.insert(key.clone(), Utc::now());
        Ok(())
    }

    async fn prune_dedup(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let before = inner.dedup.len();
        inner.dedup.retain(|_, applied_at| *applied_at >= older_than);
        Ok(before - inner.dedup.len())
    }

    async fn stage_counts(&self) -> Result<HashMap<Stage, u64>> {
        let inner = self.inner.lock();
        let mut counts = HashMap::new();
        for incident in inner.incidents.values() {
            *counts.entry(incident.stage).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn dedup_len(&self) -> Result<u64> {
        Ok(self.inner.lock().dedup.len() as u64)
    }
}
