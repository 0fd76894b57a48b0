//! Health and status HTTP surface.
//!
//! Two endpoints: `/health` is a liveness probe, `/status` reports processing
//! counters, worker saturation, and store-level gauges for operators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::store::IncidentStore;

/// Monotonic processing counters shared between the dispatcher and the
/// status endpoint. `active_workers` is a gauge.
#[derive(Debug, Default)]
pub struct Counters {
    pub events_received: AtomicU64,
    pub events_applied: AtomicU64,
    pub events_ignored: AtomicU64,
    pub events_orphaned: AtomicU64,
    pub events_replayed: AtomicU64,
    pub dead_letters: AtomicU64,
    pub commands_published: AtomicU64,
    pub version_conflicts: AtomicU64,
    pub active_workers: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn read(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCounts {
    pub received: u64,
    pub applied: u64,
    pub ignored: u64,
    pub orphaned: u64,
    pub replayed: u64,
    pub dead_letters: u64,
    pub version_conflicts: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub active_workers: u64,
    pub pool_size: usize,
    pub events: EventCounts,
    pub commands_published: u64,
    pub dedup_entries: u64,
    pub stages: HashMap<String, u64>,
}

#[derive(Clone)]
pub struct HealthState {
    pub counters: Arc<Counters>,
    pub store: Arc<dyn IncidentStore>,
    pub pool_size: usize,
}

impl HealthState {
    pub async fn snapshot(&self) -> crate::error::Result<HealthSnapshot> {
        let stages = self
            .store
            .stage_counts()
            .await?
            .into_iter()
            .map(|(stage, count)| (stage.as_str().to_string(), count))
            .collect();

        Ok(HealthSnapshot {
            status: "ok",
            active_workers: Counters::read(&self.counters.active_workers),
            pool_size: self.pool_size,
            events: EventCounts {
                received: Counters::read(&self.counters.events_received),
                applied: Counters::read(&self.counters.events_applied),
                ignored: Counters::read(&self.counters.events_ignored),
                orphaned: Counters::read(&self.counters.events_orphaned),
                replayed: Counters::read(&self.counters.events_replayed),
                dead_letters: Counters::read(&self.counters.dead_letters),
                version_conflicts: Counters::read(&self.counters.version_conflicts),
            },
            commands_published: Counters::read(&self.counters.commands_published),
            dedup_entries: self.store.dedup_len().await?,
            stages,
        })
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(
    State(state): State<HealthState>,
) -> Result<Json<HealthSnapshot>, StatusCode> {
    state
        .snapshot()
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Bind and serve the health router until the process exits.
pub async fn serve(bind: &str, state: HealthState) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "health endpoint listening");
    axum::serve(listener, router(state))
        .await
        .map_err(crate::error::Error::Io)?;
    Ok(())
}
