//! Transport-agnostic domain types: incidents, events, commands, billing.

mod billing;
mod command;
mod event;
mod ids;
mod incident;

pub use billing::{BillingSaga, BillingStatus};
pub use command::{
    ChargePaymentPayload, Command, CommandKind, EscalateCompensationPayload,
    ReleasePaymentHoldPayload, RequestDispatchPayload, SendNotificationPayload,
    StartBillingSagaPayload, VerifyInsurancePayload,
};
pub use event::{
    ArrivedPayload, CancelPayload, ChargedPayload, DispatchAssignedPayload, Event, EventKind,
    FailedPayload, HoldReleasedPayload, NotificationSentPayload, OnboardPayload, TriagePayload,
    VerifiedPayload, VitalSigns, VitalsPayload,
};
pub use ids::{AmbulanceId, DedupKey, HospitalId, IncidentId, PatientId};
pub use incident::{Incident, Priority, Severity, Stage};
