//! Outbound commands returned by the state machine.
//!
//! Commands are declarative side effects: the pure transition function only
//! returns them; the dispatcher's execution layer publishes them to broker
//! topics or performs the collaborator HTTP call they describe.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{HospitalId, IncidentId, PatientId};
use super::incident::Priority;
use crate::broker::topics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationPayload {
    pub patient_id: PatientId,
    pub template: String,
    #[serde(default)]
    pub nok_contact: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDispatchPayload {
    pub patient_id: PatientId,
    #[serde(default)]
    pub location: Option<serde_json::Value>,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBillingSagaPayload {
    pub patient_id: PatientId,
    #[serde(default)]
    pub hospital_id: Option<HospitalId>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyInsurancePayload {
    pub patient_id: PatientId,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargePaymentPayload {
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePaymentHoldPayload {
    #[serde(default)]
    pub payment_reference: Option<String>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateCompensationPayload {
    pub reason: String,
}

/// Command body, tagged by wire name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum CommandKind {
    SendNotification(SendNotificationPayload),
    RequestDispatch(RequestDispatchPayload),
    StartBillingSaga(StartBillingSagaPayload),
    VerifyInsurance(VerifyInsurancePayload),
    ChargePayment(ChargePaymentPayload),
    ReleasePaymentHold(ReleasePaymentHoldPayload),
    EscalateCompensation(EscalateCompensationPayload),
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::SendNotification(_) => "SendNotification",
            CommandKind::RequestDispatch(_) => "RequestDispatch",
            CommandKind::StartBillingSaga(_) => "StartBillingSaga",
            CommandKind::VerifyInsurance(_) => "VerifyInsurance",
            CommandKind::ChargePayment(_) => "ChargePayment",
            CommandKind::ReleasePaymentHold(_) => "ReleasePaymentHold",
            CommandKind::EscalateCompensation(_) => "EscalateCompensation",
        }
    }
}

/// One outbound command bound to its incident.
///
/// `token` is the incident version in effect after the transition that issued
/// the command; it feeds the envelope's idempotency key and, for charges, the
/// payment gateway's idempotency token.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub incident_id: IncidentId,
    pub token: u64,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(incident_id: IncidentId, token: u64, kind: CommandKind) -> Self {
        Self {
            incident_id,
            token,
            kind,
        }
    }

    /// Broker topic for published commands; `None` for commands executed as
    /// direct collaborator calls by the execution layer.
    pub fn topic(&self) -> Option<&'static str> {
        match self.kind {
            CommandKind::SendNotification(_) => Some(topics::NOTIFICATION_COMMANDS),
            CommandKind::RequestDispatch(_) => Some(topics::DISPATCH_COMMANDS),
            CommandKind::StartBillingSaga(_) => Some(topics::BILLING_COMMANDS),
            CommandKind::VerifyInsurance(_) => None,
            CommandKind::ChargePayment(_) => None,
            CommandKind::ReleasePaymentHold(_) => Some(topics::BILLING_COMMANDS),
            CommandKind::EscalateCompensation(_) => Some(topics::OPS_MANUAL),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Stable idempotency key for the outbound envelope. Downstream services
    /// are not assumed idempotent, so replays of an applied event never
    /// re-emit commands; this key lets them de-duplicate defensively anyway.
    pub fn idempotency_key(&self) -> String {
        format!("{}/{}/{}", self.incident_id, self.kind.name(), self.token)
    }
}
