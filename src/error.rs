use thiserror::Error;

use crate::domain::IncidentId;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Inbound message decoding errors. A `CodecError` means the message never
/// reached the state machine; the dispatcher dead-letters it.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("unknown event kind '{kind}' on topic '{topic}'")]
    UnknownKind { topic: String, kind: String },

    #[error("missing field '{field}' in {kind} payload")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("empty incident id")]
    EmptyIncidentId,

    #[error("empty dedup key for incident {incident_id}")]
    EmptyDedupKey { incident_id: String },
}

/// Incident store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("version conflict for incident {incident_id}: stored {stored}, attempted {attempted}")]
    VersionConflict {
        incident_id: IncidentId,
        stored: u64,
        attempted: u64,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt record for incident {incident_id}: {reason}")]
    CorruptRecord { incident_id: IncidentId, reason: String },
}

/// Collaborator call errors (insurance verify / payment charge).
#[derive(Error, Debug)]
pub enum CollabError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collaborator returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("deadline of {deadline_ms}ms exceeded after {attempts} attempts")]
    DeadlineExceeded { deadline_ms: u64, attempts: u32 },

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Collab(#[from] CollabError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker error: {0}")]
    Broker(String),
}

pub type Result<T> = std::result::Result<T, Error>;
