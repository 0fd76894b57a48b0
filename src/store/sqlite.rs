//! SQLite store implementation using Diesel.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::IncidentStore;
use crate::db::model::{DedupRow, IncidentRow};
use crate::db::schema::{dedup_entries, incidents};
use crate::db::DbPool;
use crate::domain::{DedupKey, Incident, IncidentId, Stage};
use crate::error::{Result, StoreError};

/// SQLite-backed incident store. `commit` runs the version check, the dedup
/// insert, and the incident upsert in one transaction.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<impl std::ops::DerefMut<Target = SqliteConnection>> {
        self.pool
            .get()
            .map_err(|e| StoreError::Connection(e.to_string()).into())
    }
}

#[async_trait]
impl IncidentStore for SqliteStore {
    async fn load(&self, id: &IncidentId) -> Result<Option<Incident>> {
        let mut conn = self.conn()?;
        let row: Option<IncidentRow> = incidents::table
            .find(id.to_string())
            .first(&mut *conn)
            .optional()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.map(IncidentRow::into_incident).transpose()?)
    }

    async fn is_applied(&self, key: &DedupKey) -> Result<bool> {
        let mut conn = self.conn()?;
        let found: Option<String> = dedup_entries::table
            .find(key.to_string())
            .select(dedup_entries::dedup_key)
            .first(&mut *conn)
            .optional()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(found.is_some())
    }

    async fn commit(&self, incident: &Incident, key: &DedupKey) -> Result<()> {
        let row = IncidentRow::from_incident(incident)?;
        let dedup_row = DedupRow::new(key.as_str(), incident.id.as_str());
        let mut conn = self.conn()?;

        let mut conflict: Option<u64> = None;
        let mut replayed = false;

        let result = conn.transaction::<_, diesel::result::Error, _>(|conn| {
            // Replay check first: an applied key commits nothing.
            let inserted = diesel::insert_or_ignore_into(dedup_entries::table)
                .values(&dedup_row)
                .execute(conn)?;
            if inserted == 0 {
                replayed = true;
                return Err(diesel::result::Error::RollbackTransaction);
            }

            let stored: Option<i64> = incidents::table
                .find(&row.id)
                .select(incidents::version)
                .first(conn)
                .optional()?;
            let expected = stored.map_or(1, |v| v + 1);
            if row.version != expected {
                conflict = Some(stored.unwrap_or(0) as u64);
                return Err(diesel::result::Error::RollbackTransaction);
            }

            diesel::replace_into(incidents::table)
                .values(&row)
                .execute(conn)?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(diesel::result::Error::RollbackTransaction) if replayed => Ok(()),
            Err(diesel::result::Error::RollbackTransaction) if conflict.is_some() => {
                Err(StoreError::VersionConflict {
                    incident_id: incident.id.clone(),
                    stored: conflict.unwrap_or(0),
                    attempted: incident.version,
                }
                .into())
            }
            Err(e) => Err(StoreError::Database(e.to_string()).into()),
        }
    }

    async fn mark_applied(&self, incident_id: &IncidentId, key: &DedupKey) -> Result<()> {
        let mut conn = self.conn()?;
        diesel::insert_or_ignore_into(dedup_entries::table)
            .values(&DedupRow::new(key.as_str(), incident_id.as_str()))
            .execute(&mut *conn)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn prune_dedup(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn()?;
        let pruned = diesel::delete(
            dedup_entries::table.filter(dedup_entries::applied_at.lt(older_than.to_rfc3339())),
        )
        .execute(&mut *conn)
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(pruned)
    }

    async fn stage_counts(&self) -> Result<HashMap<Stage, u64>> {
        let mut conn = self.conn()?;
        let rows: Vec<(String, i64)> = incidents::table
            .group_by(incidents::stage)
            .select((incidents::stage, diesel::dsl::count_star()))
            .load(&mut *conn)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut counts = HashMap::new();
        for (stage, count) in rows {
            let stage: Stage = serde_json::from_value(serde_json::Value::String(stage.clone()))
                .map_err(|_| StoreError::Database(format!("unknown stage '{stage}'")))?;
            counts.insert(stage, count as u64);
        }
        Ok(counts)
    }

    async fn dedup_len(&self) -> Result<u64> {
        let mut conn = self.conn()?;
        let count: i64 = dedup_entries::table
            .count()
            .get_result(&mut *conn)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(count as u64)
    }
}
