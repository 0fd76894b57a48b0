//! HTTP implementations of the collaborator traits.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{with_retry, ChargeOutcome, InsuranceVerifier, PaymentGateway, VerifyOutcome};
use crate::config::RetryConfig;
use crate::domain::{IncidentId, PatientId};
use crate::error::CollabError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    patient_id: &'a str,
    incident_id: &'a str,
    amount: Decimal,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    verified: bool,
    covered_amount: Option<Decimal>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChargeRequest<'a> {
    incident_id: &'a str,
    amount: Decimal,
    idempotency_key: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChargeResponse {
    reference: String,
}

async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
    client: &Client,
    url: &str,
    body: &B,
) -> Result<R, CollabError> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CollabError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

/// Insurance verification over HTTP.
pub struct InsuranceHttpClient {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl InsuranceHttpClient {
    pub fn new(base_url: String, retry: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            base_url,
            retry,
        }
    }
}

#[async_trait]
impl InsuranceVerifier for InsuranceHttpClient {
    async fn verify(
        &self,
        patient_id: &PatientId,
        incident_id: &IncidentId,
        amount: Decimal,
    ) -> Result<VerifyOutcome, CollabError> {
        let url = format!("{}/insurance/verify", self.base_url);
        let request = VerifyRequest {
            patient_id: patient_id.as_str(),
            incident_id: incident_id.as_str(),
            amount,
        };
        let response: VerifyResponse = with_retry(&self.retry, "insurance.verify", || {
            post_json(&self.client, &url, &request)
        })
        .await?;

        debug!(
            incident_id = %incident_id,
            verified = response.verified,
            "insurance verification completed"
        );
        Ok(VerifyOutcome {
            verified: response.verified,
            covered_amount: response.covered_amount,
        })
    }
}

/// Payment charging over HTTP. The idempotency key is forwarded so the
/// gateway can collapse retried charges.
pub struct PaymentsHttpClient {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl PaymentsHttpClient {
    pub fn new(base_url: String, retry: RetryConfig) -> Self {
        Self {
            client: Client::new(),
            base_url,
            retry,
        }
    }
}

#[async_trait]
impl PaymentGateway for PaymentsHttpClient {
    async fn charge(
        &self,
        incident_id: &IncidentId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, CollabError> {
        let url = format!("{}/payments/charge", self.base_url);
        let request = ChargeRequest {
            incident_id: incident_id.as_str(),
            amount,
            idempotency_key,
        };
        let response: ChargeResponse = with_retry(&self.retry, "payments.charge", || {
            post_json(&self.client, &url, &request)
        })
        .await?;

        debug!(
            incident_id = %incident_id,
            reference = %response.reference,
            "payment charge completed"
        );
        Ok(ChargeOutcome {
            reference: response.reference,
        })
    }
}
