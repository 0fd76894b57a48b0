//! Command execution layer.
//!
//! Commands with a broker topic are encoded and published. Collaborator
//! commands (insurance verification, payment charge) are executed as HTTP
//! calls and their outcomes folded back into the workflow as synthetic
//! billing events on the internal feedback channel, so they travel the same
//! dedup-checked path as broker deliveries.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::CommandPublisher;
use crate::codec;
use crate::collab::{InsuranceVerifier, PaymentGateway};
use crate::domain::{
    ChargedPayload, Command, CommandKind, DedupKey, Event, EventKind, FailedPayload,
    VerifiedPayload,
};
use crate::error::{Error, Result};
use crate::health::Counters;

pub struct CommandExecutor {
    publisher: Arc<dyn CommandPublisher>,
    insurance: Arc<dyn InsuranceVerifier>,
    payments: Arc<dyn PaymentGateway>,
    counters: Arc<Counters>,
}

impl CommandExecutor {
    pub fn new(
        publisher: Arc<dyn CommandPublisher>,
        insurance: Arc<dyn InsuranceVerifier>,
        payments: Arc<dyn PaymentGateway>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            publisher,
            insurance,
            payments,
            counters,
        }
    }

    /// Execute one command. Collaborator outcomes are reported through
    /// `feedback` rather than returned.
    pub async fn execute(&self, command: Command, feedback: &mpsc::Sender<Event>) -> Result<()> {
        if let Some(topic) = command.topic() {
            let payload = codec::encode_command(&command)?;
            self.publisher.publish(topic, payload).await?;
            Counters::incr(&self.counters.commands_published);
            debug!(
                incident_id = %command.incident_id,
                command = command.name(),
                topic,
                "command published"
            );
            return Ok(());
        }

        let outcome = match &command.kind {
            CommandKind::VerifyInsurance(payload) => {
                match self
                    .insurance
                    .verify(&payload.patient_id, &command.incident_id, payload.amount)
                    .await
                {
                    Ok(outcome) => EventKind::BillingVerified(VerifiedPayload {
                        verified: outcome.verified,
                        covered_amount: outcome.covered_amount,
                    }),
                    Err(err) => {
                        // An unreachable insurer reads as a declined
                        // verification; nothing has been committed yet.
                        warn!(
                            incident_id = %command.incident_id,
                            error = %err,
                            "insurance verification call failed"
                        );
                        EventKind::BillingVerified(VerifiedPayload {
                            verified: false,
                            covered_amount: None,
                        })
                    }
                }
            }
            CommandKind::ChargePayment(payload) => {
                match self
                    .payments
                    .charge(
                        &command.incident_id,
                        payload.amount,
                        &command.idempotency_key(),
                    )
                    .await
                {
                    Ok(outcome) => EventKind::BillingCharged(ChargedPayload {
                        reference: outcome.reference,
                    }),
                    Err(err) => {
                        warn!(
                            incident_id = %command.incident_id,
                            error = %err,
                            "payment charge failed"
                        );
                        EventKind::BillingFailed(FailedPayload {
                            reason: Some(err.to_string()),
                        })
                    }
                }
            }
            // Covered by the topic branch above.
            other => {
                return Err(Error::Broker(format!(
                    "command {} has no topic and no executor",
                    other.name()
                )))
            }
        };

        let dedup_key =
            DedupKey::synthetic(&command.incident_id, outcome.name(), command.token);
        let event = Event::new(command.incident_id.clone(), outcome, dedup_key);
        feedback
            .send(event)
            .await
            .map_err(|_| Error::Broker("internal event channel closed".into()))
    }
}
