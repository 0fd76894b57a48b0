//! Lifeline - emergency incident orchestration.
//!
//! Consumes triage, dispatch, and billing status events from a message
//! broker, runs each incident through a per-incident workflow state machine,
//! and emits commands to the notification, dispatch, and billing services.
//! Arrival at a hospital opens a billing saga (verify insurance, charge,
//! compensate on failure) whose collaborator calls are made over HTTP.
//!
//! # Modules
//!
//! - [`config`] - Configuration loading from TOML files
//! - [`domain`] - Transport-agnostic types: events, commands, incidents, sagas
//! - [`workflow`] - The pure incident state machine and billing saga
//! - [`store`] - Incident persistence and the dedup ledger (memory / SQLite)
//! - [`broker`] - Broker seam and the in-process loopback implementation
//! - [`codec`] - JSON wire envelopes for events and commands
//! - [`collab`] - HTTP collaborators: insurance verification, payments
//! - [`dispatch`] - Per-incident worker dispatcher and command execution
//! - [`health`] - Liveness and status HTTP endpoints
//! - [`error`] - Error types for the crate
//!
//! # Features
//!
//! - `testkit` - Expose scriptable collaborator doubles for integration tests

pub mod app;
pub mod broker;
pub mod codec;
pub mod collab;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod health;
pub mod store;
pub mod workflow;
