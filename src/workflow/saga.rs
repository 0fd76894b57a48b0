//! Billing saga sub-machine.
//!
//! Pure given its inputs: verify/charge/refund side effects are returned as
//! commands and executed by the dispatcher's execution layer, which folds the
//! outcomes back in as events. A charge failure after the hold was placed
//! compensates with a hold release; a pre-charge verification failure simply
//! terminates the saga, since nothing was committed yet.

use rust_decimal::Decimal;

use crate::domain::{
    BillingSaga, BillingStatus, ChargePaymentPayload, CommandKind, EscalateCompensationPayload,
    EventKind, PatientId, ReleasePaymentHoldPayload, VerifyInsurancePayload,
};

/// Incident-side inputs the saga needs to build its commands.
pub struct SagaContext<'a> {
    pub patient_id: &'a PatientId,
    /// Incident version the current transition will commit with; doubles as
    /// the charge idempotency token.
    pub next_version: u64,
}

/// Result of feeding one event into the saga.
#[derive(Debug)]
pub enum SagaStep {
    /// The saga advanced; persist the new state and execute the commands.
    Advanced {
        saga: BillingSaga,
        commands: Vec<CommandKind>,
        /// True once the saga reached `Paid`: the workflow closes the incident.
        close_incident: bool,
    },
    /// The event is not admissible for the saga's current status.
    Ignored { status: BillingStatus, reason: String },
}

/// Create the saga and issue the verification call (PENDING -> VERIFYING).
pub fn start(amount: Decimal, ctx: &SagaContext<'_>) -> (BillingSaga, Vec<CommandKind>) {
    let mut saga = BillingSaga::new(amount);
    saga.status = BillingStatus::Verifying;
    let commands = vec![CommandKind::VerifyInsurance(VerifyInsurancePayload {
        patient_id: ctx.patient_id.clone(),
        amount,
    })];
    (saga, commands)
}

/// Advance the saga with one billing event.
pub fn step(saga: &BillingSaga, kind: &EventKind, ctx: &SagaContext<'_>) -> SagaStep {
    match (saga.status, kind) {
        (BillingStatus::Verifying, EventKind::BillingVerified(payload)) => {
            let mut next = saga.clone();
            next.insurance_verified = Some(payload.verified);
            if payload.verified {
                // VERIFIED is pass-through: the charge goes out immediately.
                if let Some(covered) = payload.covered_amount {
                    next.amount = covered;
                }
                next.status = BillingStatus::Charging;
                next.charge_token = Some(ctx.next_version);
                SagaStep::Advanced {
                    commands: vec![CommandKind::ChargePayment(ChargePaymentPayload {
                        amount: next.amount,
                    })],
                    saga: next,
                    close_incident: false,
                }
            } else {
                next.status = BillingStatus::Failed;
                next.last_error = Some("insurance verification declined".into());
                SagaStep::Advanced {
                    saga: next,
                    commands: Vec::new(),
                    close_incident: false,
                }
            }
        }
        (BillingStatus::Charging, EventKind::BillingCharged(payload)) => {
            let mut next = saga.clone();
            next.status = BillingStatus::Paid;
            next.payment_reference = Some(payload.reference.clone());
            SagaStep::Advanced {
                saga: next,
                commands: Vec::new(),
                close_incident: true,
            }
        }
        (BillingStatus::Charging, EventKind::BillingFailed(payload)) => {
            let mut next = saga.clone();
            next.status = BillingStatus::Compensating;
            next.last_error = payload.reason.clone().or(Some("charge failed".into()));
            SagaStep::Advanced {
                commands: vec![CommandKind::ReleasePaymentHold(ReleasePaymentHoldPayload {
                    payment_reference: next.payment_reference.clone(),
                    amount: next.amount,
                })],
                saga: next,
                close_incident: false,
            }
        }
        (BillingStatus::Compensating, EventKind::HoldReleased(payload)) => {
            if payload.released {
                let mut next = saga.clone();
                next.status = BillingStatus::RolledBack;
                SagaStep::Advanced {
                    saga: next,
                    commands: Vec::new(),
                    close_incident: false,
                }
            } else {
                // Refund itself failed: stay pinned in COMPENSATING and hand
                // the incident to an operator.
                let mut next = saga.clone();
                next.last_error = payload
                    .reason
                    .clone()
                    .or(Some("payment hold release failed".into()));
                SagaStep::Advanced {
                    commands: vec![CommandKind::EscalateCompensation(
                        EscalateCompensationPayload {
                            reason: next
                                .last_error
                                .clone()
                                .unwrap_or_else(|| "compensation failure".into()),
                        },
                    )],
                    saga: next,
                    close_incident: false,
                }
            }
        }
        (BillingStatus::Compensating, EventKind::BillingFailed(payload)) => {
            let mut next = saga.clone();
            next.last_error = payload.reason.clone().or(Some("compensation failed".into()));
            SagaStep::Advanced {
                commands: vec![CommandKind::EscalateCompensation(
                    EscalateCompensationPayload {
                        reason: next
                            .last_error
                            .clone()
                            .unwrap_or_else(|| "compensation failure".into()),
                    },
                )],
                saga: next,
                close_incident: false,
            }
        }
        (status, kind) => SagaStep::Ignored {
            status,
            reason: format!("{} not admissible in {status:?}", kind.name()),
        },
    }
}
