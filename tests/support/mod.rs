//! Shared harness for integration tests: an in-memory store, a loopback
//! broker, and scriptable collaborators wired into a running dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use lifeline::broker::{InboundMessage, LoopbackBroker, LoopbackPublisher};
use lifeline::codec;
use lifeline::collab::{InsuranceVerifier, PaymentGateway};
use lifeline::config::{BillingConfig, DispatcherConfig, TriageConfig};
use lifeline::dispatch::Dispatcher;
use lifeline::domain::{Event, EventKind, Incident, IncidentId, Stage};
use lifeline::health::Counters;
use lifeline::store::{IncidentStore, MemoryStore};
use lifeline::workflow::WorkflowMachine;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<LoopbackPublisher>,
    pub counters: Arc<Counters>,
    inject: mpsc::Sender<InboundMessage>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    pub fn start(
        insurance: Arc<dyn InsuranceVerifier>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        let mut broker = LoopbackBroker::new(64);
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(broker.publisher());
        let counters = Arc::new(Counters::default());
        let dispatcher = Dispatcher::new(
            WorkflowMachine::new(TriageConfig::default(), BillingConfig::default()),
            store.clone(),
            publisher.clone(),
            insurance,
            payments,
            DispatcherConfig::default(),
            counters.clone(),
        );
        let inject = broker.sender();
        let source = broker.source();
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(dispatcher.run(source, shutdown_rx));
        Self {
            store,
            publisher,
            counters,
            inject,
            shutdown,
        }
    }

    /// Inject an event as an encoded broker delivery.
    pub async fn deliver(&self, topic: &str, incident: &str, kind: EventKind, key: &str) {
        let event = Event::new(incident, kind, key);
        let payload = codec::encode_event(&event).expect("encode event");
        self.inject
            .send(InboundMessage::new(topic, payload))
            .await
            .expect("inject delivery");
    }

    pub async fn incident(&self, id: &str) -> Option<Incident> {
        self.store
            .load(&IncidentId::new(id))
            .await
            .expect("load incident")
    }

    /// Poll until the incident reaches the given stage.
    pub async fn wait_for_stage(&self, id: &str, stage: Stage) -> Incident {
        for _ in 0..300 {
            if let Some(incident) = self.incident(id).await {
                if incident.stage == stage {
                    return incident;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("incident {id} never reached {stage:?}");
    }

    /// Poll until `condition` holds for the incident.
    pub async fn wait_for(&self, id: &str, condition: impl Fn(&Incident) -> bool) -> Incident {
        for _ in 0..300 {
            if let Some(incident) = self.incident(id).await {
                if condition(&incident) {
                    return incident;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never held for incident {id}");
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}
