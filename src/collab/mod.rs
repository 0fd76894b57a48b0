//! Synchronous collaborator calls: insurance verification and payment
//! charging.
//!
//! Both calls sit on the billing saga's critical path, so failures here are
//! folded back into the workflow as failure events rather than propagated as
//! process errors. The retry helper bounds each logical call with a deadline.

mod http;
#[cfg(any(test, feature = "testkit"))]
pub mod mock;

pub use http::{InsuranceHttpClient, PaymentsHttpClient};

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::warn;

use crate::config::RetryConfig;
use crate::domain::{IncidentId, PatientId};
use crate::error::CollabError;

/// Result of an insurance verification call.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    pub verified: bool,
    /// Amount the insurer covers, when the policy reports one.
    pub covered_amount: Option<Decimal>,
}

/// Result of a successful charge. A declined or failed charge surfaces as a
/// `CollabError`, not as an outcome variant.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeOutcome {
    pub reference: String,
}

#[async_trait]
pub trait InsuranceVerifier: Send + Sync {
    async fn verify(
        &self,
        patient_id: &PatientId,
        incident_id: &IncidentId,
        amount: Decimal,
    ) -> Result<VerifyOutcome, CollabError>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge the given amount. The idempotency key makes retried calls safe
    /// on the gateway side.
    async fn charge(
        &self,
        incident_id: &IncidentId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, CollabError>;
}

fn is_retryable(err: &CollabError) -> bool {
    match err {
        CollabError::Request(_) => true,
        // 5xx is transient, 4xx is a definitive answer.
        CollabError::Status { status, .. } => *status >= 500,
        _ => false,
    }
}

/// Run `op` under the retry policy: bounded attempts, exponential backoff
/// with jitter, and an overall deadline covering all attempts.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    op_name: &'static str,
    mut op: F,
) -> Result<T, CollabError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollabError>>,
{
    let started = Instant::now();
    let deadline = Duration::from_millis(policy.deadline_ms);
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        if started.elapsed() >= deadline {
            return Err(CollabError::DeadlineExceeded {
                deadline_ms: policy.deadline_ms,
                attempts: attempt - 1,
            });
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && attempt < policy.max_attempts => {
                warn!(op = op_name, attempt, error = %err, "collaborator call failed, retrying");
                last_error = err.to_string();

                // Cap the exponent; attempt counts past 63 would overflow
                // the shift.
                let backoff = policy
                    .base_backoff_ms
                    .saturating_mul(1u64 << (attempt - 1).min(16));
                let jitter = rand::thread_rng().gen_range(0..=policy.base_backoff_ms);
                let pause = Duration::from_millis(backoff.saturating_add(jitter));
                let remaining = deadline.saturating_sub(started.elapsed());
                tokio::time::sleep(pause.min(remaining)).await;
            }
            Err(err) if is_retryable(&err) => {
                return Err(CollabError::RetriesExhausted {
                    attempts: policy.max_attempts,
                    last_error: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    Err(CollabError::RetriesExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}
