//! Domain identifier types with proper encapsulation.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        ///
        /// The inner String is private to ensure all construction goes through
        /// the defined constructors.
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

string_id! {
    /// Incident identifier - globally unique, supplied by the triage event.
    IncidentId
}

string_id! {
    /// Patient identifier.
    PatientId
}

string_id! {
    /// Ambulance unit identifier, assigned by the dispatch service.
    AmbulanceId
}

string_id! {
    /// Destination hospital identifier.
    HospitalId
}

/// Stable idempotency key for one logical event delivery.
///
/// Inbound events carry their key in the message envelope. Internally
/// generated events (collaborator call outcomes) derive a deterministic key
/// from the incident, the event kind, and the idempotency token of the call
/// that produced them, so a retried call cannot apply twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Deterministic key for an internally folded-back event.
    pub fn synthetic(incident_id: &IncidentId, kind: &str, token: u64) -> Self {
        Self(format!("{incident_id}/{kind}/{token}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DedupKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for DedupKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
