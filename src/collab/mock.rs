//! Scriptable collaborator doubles for tests.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::{with_retry, ChargeOutcome, InsuranceVerifier, PaymentGateway, VerifyOutcome};
use crate::config::RetryConfig;
use crate::domain::{IncidentId, PatientId};
use crate::error::CollabError;

/// Verifier that always returns the same outcome.
pub struct FixedVerifier {
    outcome: VerifyOutcome,
    calls: AtomicU32,
}

impl FixedVerifier {
    pub fn approving(covered_amount: Option<Decimal>) -> Self {
        Self {
            outcome: VerifyOutcome {
                verified: true,
                covered_amount,
            },
            calls: AtomicU32::new(0),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            outcome: VerifyOutcome {
                verified: false,
                covered_amount: None,
            },
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InsuranceVerifier for FixedVerifier {
    async fn verify(
        &self,
        _patient_id: &PatientId,
        _incident_id: &IncidentId,
        _amount: Decimal,
    ) -> Result<VerifyOutcome, CollabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.clone())
    }
}

/// Gateway that approves every charge and records the idempotency keys it
/// was handed.
pub struct RecordingGateway {
    keys: Mutex<Vec<String>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn charged_keys(&self) -> Vec<String> {
        self.keys.lock().clone()
    }
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn charge(
        &self,
        incident_id: &IncidentId,
        _amount: Decimal,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, CollabError> {
        self.keys.lock().push(idempotency_key.to_string());
        Ok(ChargeOutcome {
            reference: format!("ch_{incident_id}"),
        })
    }
}

/// Gateway that declines every charge with the given reason.
pub struct DecliningGateway {
    reason: String,
}

impl DecliningGateway {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for DecliningGateway {
    async fn charge(
        &self,
        _incident_id: &IncidentId,
        _amount: Decimal,
        _idempotency_key: &str,
    ) -> Result<ChargeOutcome, CollabError> {
        Err(CollabError::Status {
            status: 402,
            body: self.reason.clone(),
        })
    }
}

/// Gateway that never answers: every attempt fails with a retryable 503, so
/// the charge surfaces as a retry-policy failure (deadline or exhaustion)
/// the same way an unresponsive real gateway would.
pub struct UnresponsiveGateway {
    retry: RetryConfig,
}

impl UnresponsiveGateway {
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }
}

#[async_trait]
impl PaymentGateway for UnresponsiveGateway {
    async fn charge(
        &self,
        _incident_id: &IncidentId,
        _amount: Decimal,
        _idempotency_key: &str,
    ) -> Result<ChargeOutcome, CollabError> {
        with_retry(&self.retry, "payments.charge", || async {
            Err::<ChargeOutcome, _>(CollabError::Status {
                status: 503,
                body: "gateway unavailable".into(),
            })
        })
        .await
    }
}
