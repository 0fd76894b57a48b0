//! Workflow state machine.
//!
//! `WorkflowMachine::transition` is a pure function from (current incident,
//! incoming event) to (next incident, outbound commands, outcome). It never
//! performs IO; persistence and side effects belong to the dispatcher.
//!
//! Delivery hazards are handled in-machine: an event for an unknown incident
//! that cannot create one is an orphan (dropped, broker redelivery retries
//! it); an event whose (stage, kind) pair is not in the table is a guarded
//! no-op (marked applied, surfaced as an inconsistency signal) because broker
//! redelivery and producer races can legitimately surface events before their
//! logical prerequisite.

pub mod saga;

pub use saga::{SagaContext, SagaStep};

use chrono::Utc;
use rust_decimal::Decimal;

use crate::config::{BillingConfig, TriageConfig};
use crate::domain::{
    Command, CommandKind, Event, EventKind, Incident, RequestDispatchPayload,
    SendNotificationPayload, Severity, Stage, StartBillingSagaPayload, TriagePayload, VitalSigns,
};

/// Result of one transition attempt.
#[derive(Debug)]
pub enum Transition {
    /// The event was accepted: persist the incident (and the dedup record)
    /// transactionally, then execute the commands.
    Applied {
        incident: Box<Incident>,
        commands: Vec<Command>,
    },
    /// Guarded no-op: incident unchanged, event marked applied, signal raised.
    Ignored { stage: Stage, reason: String },
    /// Event for an unknown incident that cannot create one. Dropped without
    /// dedup bookkeeping so broker redelivery can retry it after the incident
    /// exists.
    Orphan,
}

/// Pure transition function over the incident workflow, parameterized by the
/// severity and billing policy from configuration.
#[derive(Debug, Clone)]
pub struct WorkflowMachine {
    triage: TriageConfig,
    default_amount: Decimal,
}

impl WorkflowMachine {
    pub fn new(triage: TriageConfig, billing: BillingConfig) -> Self {
        Self {
            triage,
            default_amount: billing.default_amount,
        }
    }

    /// Classify severity from the upstream status and the vitals cutoffs.
    pub fn classify(&self, status: Option<&str>, metrics: &VitalSigns) -> Severity {
        let status_emergency = status
            .map(|s| s.eq_ignore_ascii_case("emergency"))
            .unwrap_or(false);
        let spo2_breach = metrics
            .spo2_percentage
            .map(|v| v < self.triage.spo2_emergency_below)
            .unwrap_or(false);
        let hr_breach = metrics
            .heart_rate_bpm
            .map(|v| v > self.triage.heart_rate_emergency_above)
            .unwrap_or(false);

        if status_emergency || spo2_breach || hr_breach {
            Severity::Emergency
        } else {
            Severity::Abnormal
        }
    }

    /// Apply one event to the incident (or create one).
    pub fn transition(&self, incident: Option<&Incident>, event: &Event) -> Transition {
        match incident {
            None => self.create(event),
            Some(current) => self.advance(current, event),
        }
    }

    fn create(&self, event: &Event) -> Transition {
        match &event.kind {
            EventKind::VitalsCritical(payload) => {
                let mut incident = Incident::new(
                    event.incident_id.clone(),
                    payload.patient_id.clone(),
                    Stage::New,
                );
                incident.severity = self.classify(None, &payload.metrics);
                incident.location = payload.location.clone();
                Transition::Applied {
                    incident: Box::new(incident),
                    commands: Vec::new(),
                }
            }
            EventKind::TriageFlagged(payload) => {
                let mut incident = Incident::new(
                    event.incident_id.clone(),
                    payload.patient_id.clone(),
                    Stage::Triaged,
                );
                let commands = self.apply_triage(&mut incident, payload);
                Transition::Applied {
                    incident: Box::new(incident),
                    commands,
                }
            }
            _ => Transition::Orphan,
        }
    }

    fn advance(&self, current: &Incident, event: &Event) -> Transition {
        debug_assert_eq!(current.id, event.incident_id);

        // Explicit cancel wins from any non-terminal stage, except while the
        // saga has money in flight; those incidents must resolve through the
        // saga's own terminal states first.
        if let EventKind::IncidentCancelled(_) = &event.kind {
            return self.cancel(current);
        }

        if current.is_terminal() {
            return self.ignored(current, event, "incident is terminal");
        }

        match (current.stage, &event.kind) {
            (Stage::New, EventKind::TriageFlagged(payload)) => {
                let mut next = self.accepted(current);
                next.stage = Stage::Triaged;
                let commands = self.apply_triage(&mut next, payload);
                Transition::Applied {
                    incident: Box::new(next),
                    commands,
                }
            }
            (Stage::Triaged, EventKind::NotificationSent(_)) => {
                let mut next = self.accepted(current);
                next.stage = Stage::Notified;
                Transition::Applied {
                    incident: Box::new(next),
                    commands: Vec::new(),
                }
            }
            // The notification ack can lag behind dispatch assignment, so
            // DispatchAssigned is admissible from TRIAGED as well.
            (Stage::Triaged | Stage::Notified, EventKind::DispatchAssigned(payload)) => {
                let mut next = self.accepted(current);
                next.stage = Stage::DispatchRequested;
                next.ambulance_id = Some(payload.unit_id.clone());
                Transition::Applied {
                    incident: Box::new(next),
                    commands: Vec::new(),
                }
            }
            (Stage::DispatchRequested, EventKind::AmbulanceOnboard(payload)) => {
                let mut next = self.accepted(current);
                next.stage = Stage::Onboard;
                if let Some(unit_id) = &payload.unit_id {
                    next.ambulance_id = Some(unit_id.clone());
                }
                Transition::Applied {
                    incident: Box::new(next),
                    commands: Vec::new(),
                }
            }
            (Stage::Onboard, EventKind::ArrivedAtHospital(payload)) => {
                // ARRIVED is pass-through: arrival initiates billing in the
                // same accepted transition.
                let mut next = self.accepted(current);
                next.stage = Stage::BillingInitiated;
                next.hospital_id = Some(payload.hospital_id.clone());

                let ctx = SagaContext {
                    patient_id: &next.patient_id,
                    next_version: next.version,
                };
                let (saga, saga_commands) = saga::start(self.default_amount, &ctx);
                let amount = saga.amount;
                next.billing = Some(saga);

                let mut commands = vec![Command::new(
                    next.id.clone(),
                    next.version,
                    CommandKind::StartBillingSaga(StartBillingSagaPayload {
                        patient_id: next.patient_id.clone(),
                        hospital_id: next.hospital_id.clone(),
                        amount,
                    }),
                )];
                commands.extend(
                    saga_commands
                        .into_iter()
                        .map(|kind| Command::new(next.id.clone(), next.version, kind)),
                );
                Transition::Applied {
                    incident: Box::new(next),
                    commands,
                }
            }
            (
                Stage::BillingInitiated,
                EventKind::BillingVerified(_)
                | EventKind::BillingCharged(_)
                | EventKind::BillingFailed(_)
                | EventKind::HoldReleased(_),
            ) => self.advance_saga(current, event),
            _ => self.ignored(current, event, "event kind not admissible in stage"),
        }
    }

    fn advance_saga(&self, current: &Incident, event: &Event) -> Transition {
        let Some(saga) = &current.billing else {
            return self.ignored(current, event, "billing event without saga");
        };

        let next_version = current.version + 1;
        let ctx = SagaContext {
            patient_id: &current.patient_id,
            next_version,
        };
        match saga::step(saga, &event.kind, &ctx) {
            SagaStep::Advanced {
                saga,
                commands,
                close_incident,
            } => {
                let mut next = self.accepted(current);
                next.billing = Some(saga);
                if close_incident {
                    next.stage = Stage::Closed;
                }
                let commands = commands
                    .into_iter()
                    .map(|kind| Command::new(next.id.clone(), next.version, kind))
                    .collect();
                Transition::Applied {
                    incident: Box::new(next),
                    commands,
                }
            }
            SagaStep::Ignored { status, reason } => self.ignored(
                current,
                event,
                &format!("saga in {status:?}: {reason}"),
            ),
        }
    }

    fn cancel(&self, current: &Incident) -> Transition {
        if current.is_terminal() {
            return Transition::Ignored {
                stage: current.stage,
                reason: "cancel on terminal incident".into(),
            };
        }
        if let Some(saga) = &current.billing {
            if !saga.is_terminal() {
                return Transition::Ignored {
                    stage: current.stage,
                    reason: format!("cancel while saga is {:?}", saga.status),
                };
            }
        }
        let mut next = self.accepted(current);
        next.stage = Stage::Abandoned;
        Transition::Applied {
            incident: Box::new(next),
            commands: Vec::new(),
        }
    }

    /// Copy for the next accepted transition: version bumped, clock touched.
    fn accepted(&self, current: &Incident) -> Incident {
        let mut next = current.clone();
        next.version += 1;
        next.updated_at = Utc::now();
        next
    }

    fn apply_triage(&self, incident: &mut Incident, payload: &TriagePayload) -> Vec<Command> {
        incident.severity = self.classify(payload.status.as_deref(), &payload.metrics);
        if payload.location.is_some() {
            incident.location = payload.location.clone();
        }
        if payload.nok_contact.is_some() {
            incident.nok_contact = payload.nok_contact.clone();
        }

        let template = match incident.severity {
            Severity::Emergency => "TRIAGE_EMERGENCY",
            Severity::Abnormal | Severity::Unknown => "TRIAGE_ABNORMAL",
        };
        vec![
            Command::new(
                incident.id.clone(),
                incident.version,
                CommandKind::SendNotification(SendNotificationPayload {
                    patient_id: incident.patient_id.clone(),
                    template: template.into(),
                    nok_contact: incident.nok_contact.clone(),
                    details: Some(serde_json::json!({
                        "metrics": payload.metrics,
                        "location": incident.location,
                    })),
                }),
            ),
            Command::new(
                incident.id.clone(),
                incident.version,
                CommandKind::RequestDispatch(RequestDispatchPayload {
                    patient_id: incident.patient_id.clone(),
                    location: incident.location.clone(),
                    priority: incident.priority(),
                }),
            ),
        ]
    }

    fn ignored(&self, current: &Incident, event: &Event, reason: &str) -> Transition {
        Transition::Ignored {
            stage: current.stage,
            reason: format!("{} in {:?}: {reason}", event.kind.name(), current.stage),
        }
    }
}
