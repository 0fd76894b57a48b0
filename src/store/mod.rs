//! Incident persistence with pluggable backends.
//!
//! The store owns the incident records and the deduplication ledger. The two
//! are written in one critical section / SQL transaction so a crash between
//! dedup check and incident write can cause neither a lost update nor a
//! double-apply.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DedupKey, Incident, IncidentId, Stage};
use crate::error::Result;

/// Durable keyed incident state plus the dedup ledger.
///
/// The single-writer-per-incident discipline of the dispatcher means no two
/// `commit`s for the same incident race under normal operation; the version
/// check exists to catch crash-restart races, which fail that one processing
/// attempt rather than the process.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn load(&self, id: &IncidentId) -> Result<Option<Incident>>;

    /// Has this dedup key already been applied?
    async fn is_applied(&self, key: &DedupKey) -> Result<bool>;

    /// Persist an accepted transition: upsert the incident and record the
    /// dedup key atomically. Fails with `StoreError::VersionConflict` if the
    /// stored version is not exactly one behind. A key that turns out to be
    /// already applied commits nothing and returns Ok (replay no-op).
    async fn commit(&self, incident: &Incident, key: &DedupKey) -> Result<()>;

    /// Record a guarded no-op event as applied without touching incident
    /// state, so broker redelivery cannot reprocess it forever.
    async fn mark_applied(&self, incident_id: &IncidentId, key: &DedupKey) -> Result<()>;

    /// Garbage-collect dedup entries older than the retention cutoff.
    async fn prune_dedup(&self, older_than: DateTime<Utc>) -> Result<usize>;

    /// Incident counts per stage, for the health surface.
    async fn stage_counts(&self) -> Result<HashMap<Stage, u64>>;

    /// Current dedup ledger size, for the health surface.
    async fn dedup_len(&self) -> Result<u64>;
}
