//! Event dispatcher.
//!
//! One loop fans broker deliveries (and internally folded-back collaborator
//! outcomes) out to per-incident workers. Each incident has at most one
//! worker, so its events are processed strictly in arrival order; distinct
//! incidents proceed in parallel under a semaphore bound. Workers are created
//! lazily and retire after an idle period.

mod executor;

pub use executor::CommandExecutor;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::broker::{CommandPublisher, EventSource, InboundMessage};
use crate::codec;
use crate::collab::{InsuranceVerifier, PaymentGateway};
use crate::config::DispatcherConfig;
use crate::domain::{Event, IncidentId};
use crate::error::{Error, Result, StoreError};
use crate::health::Counters;
use crate::store::IncidentStore;
use crate::workflow::{Transition, WorkflowMachine};

type WorkerMap = DashMap<IncidentId, mpsc::Sender<Event>>;

struct Shared {
    machine: WorkflowMachine,
    store: Arc<dyn IncidentStore>,
    publisher: Arc<dyn CommandPublisher>,
    executor: CommandExecutor,
    config: DispatcherConfig,
    counters: Arc<Counters>,
    permits: Arc<Semaphore>,
    feedback_tx: mpsc::Sender<Event>,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    workers: Arc<WorkerMap>,
    feedback_rx: mpsc::Receiver<Event>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine: WorkflowMachine,
        store: Arc<dyn IncidentStore>,
        publisher: Arc<dyn CommandPublisher>,
        insurance: Arc<dyn InsuranceVerifier>,
        payments: Arc<dyn PaymentGateway>,
        config: DispatcherConfig,
        counters: Arc<Counters>,
    ) -> Self {
        let (feedback_tx, feedback_rx) = mpsc::channel(config.worker_queue_capacity.max(16));
        let executor = CommandExecutor::new(
            publisher.clone(),
            insurance,
            payments,
            counters.clone(),
        );
        let shared = Arc::new(Shared {
            machine,
            store,
            publisher,
            executor,
            permits: Arc::new(Semaphore::new(config.pool_size)),
            config,
            counters,
            feedback_tx,
        });
        Self {
            shared,
            workers: Arc::new(WorkerMap::new()),
            feedback_rx,
        }
    }

    /// Sender for the internal feedback channel. Events injected here bypass
    /// the codec but still go through dedup and the state machine.
    pub fn feedback_sender(&self) -> mpsc::Sender<Event> {
        self.shared.feedback_tx.clone()
    }

    /// Run until the source closes or shutdown is signalled.
    pub async fn run(
        self,
        mut source: impl EventSource,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let Dispatcher {
            shared,
            workers,
            mut feedback_rx,
        } = self;

        let mut gc = tokio::time::interval(shared.config.dedup_gc_interval());
        gc.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        gc.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("dispatcher shutting down");
                        return Ok(());
                    }
                }
                Some(event) = feedback_rx.recv() => {
                    Self::route(&shared, &workers, event).await;
                }
                delivery = source.next() => match delivery {
                    Some(message) => Self::handle_delivery(&shared, &workers, message).await,
                    None => {
                        info!("event source closed");
                        return Ok(());
                    }
                },
                _ = gc.tick() => Self::sweep_dedup(&shared).await,
            }
        }
    }

    async fn handle_delivery(shared: &Arc<Shared>, workers: &Arc<WorkerMap>, message: InboundMessage) {
        match codec::decode_event(&message.topic, &message.payload) {
            Ok(event) => {
                Counters::incr(&shared.counters.events_received);
                Self::route(shared, workers, event).await;
            }
            Err(err) => {
                Counters::incr(&shared.counters.dead_letters);
                warn!(topic = %message.topic, error = %err, "dead-lettering undecodable message");
                let parked = codec::dead_letter(&message.topic, &message.payload, &err);
                if let Err(err) = shared
                    .publisher
                    .publish(crate::broker::topics::DEAD_LETTER, parked)
                    .await
                {
                    error!(error = %err, "failed to publish dead letter");
                }
            }
        }
    }

    async fn route(shared: &Arc<Shared>, workers: &Arc<WorkerMap>, event: Event) {
        let id = event.incident_id.clone();
        let mut pending = event;
        // One retry covers the worker retiring between lookup and send.
        for _ in 0..2 {
            let tx = match workers.get(&id) {
                Some(entry) => entry.value().clone(),
                None => Self::spawn_worker(shared, workers, &id),
            };
            match tx.try_send(pending) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Closed(event)) => {
                    workers.remove_if(&id, |_, entry| entry.same_channel(&tx));
                    pending = event;
                }
                Err(mpsc::error::TrySendError::Full(event)) => {
                    // A backlogged incident must not stall delivery to the
                    // others; park the overflow on the feedback channel.
                    warn!(incident_id = %id, "worker queue full, requeueing event");
                    match shared.feedback_tx.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(event)) => {
                            let feedback = shared.feedback_tx.clone();
                            tokio::spawn(async move {
                                if feedback.send(event).await.is_err() {
                                    error!("feedback channel closed, event lost");
                                }
                            });
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            error!(incident_id = %id, "feedback channel closed, event lost");
                        }
                    }
                    return;
                }
            }
        }
        error!(incident_id = %id, "dropping event, worker channel closed twice");
    }

    fn spawn_worker(
        shared: &Arc<Shared>,
        workers: &Arc<WorkerMap>,
        id: &IncidentId,
    ) -> mpsc::Sender<Event> {
        match workers.entry(id.clone()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let (tx, rx) = mpsc::channel(shared.config.worker_queue_capacity);
                vacant.insert(tx.clone());
                shared.counters.active_workers.fetch_add(1, Ordering::Relaxed);
                debug!(incident_id = %id, "worker started");
                tokio::spawn(Self::worker_loop(
                    shared.clone(),
                    workers.clone(),
                    id.clone(),
                    rx,
                ));
                tx
            }
        }
    }

    async fn worker_loop(
        shared: Arc<Shared>,
        workers: Arc<WorkerMap>,
        id: IncidentId,
        mut rx: mpsc::Receiver<Event>,
    ) {
        loop {
            match tokio::time::timeout(shared.config.worker_idle(), rx.recv()).await {
                Ok(Some(event)) => Self::handle_event(&shared, event).await,
                Ok(None) => break,
                Err(_) => {
                    Self::retire(&shared, &workers, &id, &mut rx).await;
                    break;
                }
            }
        }
        shared.counters.active_workers.fetch_sub(1, Ordering::Relaxed);
        debug!(incident_id = %id, "worker retired");
    }

    /// Idle retirement. Unregister first so new events recreate the worker,
    /// then close the queue and requeue anything that raced in through the
    /// feedback channel. The retiring worker processes nothing past the
    /// unregister; a replacement for the same incident may already be live.
    async fn retire(
        shared: &Arc<Shared>,
        workers: &Arc<WorkerMap>,
        id: &IncidentId,
        rx: &mut mpsc::Receiver<Event>,
    ) {
        workers.remove(id);
        rx.close();
        while let Some(event) = rx.recv().await {
            if shared.feedback_tx.send(event).await.is_err() {
                error!(incident_id = %id, "feedback channel closed, queued event lost");
            }
        }
    }

    async fn handle_event(shared: &Arc<Shared>, event: Event) {
        let Ok(_permit) = shared.permits.acquire().await else {
            return;
        };
        if let Err(err) = Self::process(shared, &event).await {
            error!(
                incident_id = %event.incident_id,
                kind = event.kind.name(),
                error = %err,
                "event processing failed"
            );
        }
    }

    async fn process(shared: &Arc<Shared>, event: &Event) -> Result<()> {
        if shared.store.is_applied(&event.dedup_key).await? {
            Counters::incr(&shared.counters.events_replayed);
            debug!(
                incident_id = %event.incident_id,
                dedup_key = %event.dedup_key,
                "replayed event dropped"
            );
            return Ok(());
        }

        let current = shared.store.load(&event.incident_id).await?;
        match shared.machine.transition(current.as_ref(), event) {
            Transition::Applied { incident, commands } => {
                match shared.store.commit(&incident, &event.dedup_key).await {
                    Ok(()) => {}
                    Err(Error::Store(StoreError::VersionConflict { stored, attempted, .. })) => {
                        Counters::incr(&shared.counters.version_conflicts);
                        warn!(
                            incident_id = %event.incident_id,
                            stored,
                            attempted,
                            "version conflict, requeueing event"
                        );
                        if shared.feedback_tx.send(event.clone()).await.is_err() {
                            error!("feedback channel closed, conflict event lost");
                        }
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                }
                Counters::incr(&shared.counters.events_applied);
                info!(
                    incident_id = %incident.id,
                    kind = event.kind.name(),
                    stage = incident.stage.as_str(),
                    version = incident.version,
                    "transition applied"
                );
                for command in commands {
                    if let Err(err) = shared
                        .executor
                        .execute(command, &shared.feedback_tx)
                        .await
                    {
                        error!(
                            incident_id = %incident.id,
                            error = %err,
                            "command execution failed"
                        );
                    }
                }
            }
            Transition::Ignored { stage, reason } => {
                Counters::incr(&shared.counters.events_ignored);
                warn!(
                    incident_id = %event.incident_id,
                    stage = stage.as_str(),
                    reason,
                    "event ignored"
                );
                shared
                    .store
                    .mark_applied(&event.incident_id, &event.dedup_key)
                    .await?;
            }
            Transition::Orphan => {
                Counters::incr(&shared.counters.events_orphaned);
                // Not marked applied: redelivery retries it once the
                // incident exists.
                info!(
                    incident_id = %event.incident_id,
                    kind = event.kind.name(),
                    "orphan event dropped"
                );
            }
        }
        Ok(())
    }

    async fn sweep_dedup(shared: &Arc<Shared>) {
        let cutoff = Utc::now() - shared.config.dedup_retention();
        match shared.store.prune_dedup(cutoff).await {
            Ok(0) => {}
            Ok(pruned) => info!(pruned, "dedup ledger swept"),
            Err(err) => error!(error = %err, "dedup sweep failed"),
        }
    }
}
