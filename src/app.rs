//! Application orchestration: wires the store, broker, collaborators,
//! dispatcher, and health endpoint together from configuration.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::broker::LoopbackBroker;
use crate::collab::{InsuranceHttpClient, PaymentsHttpClient};
use crate::config::Config;
use crate::db;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::health::{self, Counters, HealthState};
use crate::store::{IncidentStore, MemoryStore, SqliteStore};
use crate::workflow::WorkflowMachine;

pub struct App;

impl App {
    pub async fn run(config: Config) -> Result<()> {
        let store: Arc<dyn IncidentStore> = match &config.database {
            Some(path) => {
                let pool = db::create_pool(&path.to_string_lossy())?;
                db::run_migrations(&pool)?;
                info!(path = %path.display(), "sqlite store ready");
                Arc::new(SqliteStore::new(pool))
            }
            None => {
                info!("running on in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let mut broker = LoopbackBroker::new(1024);
        let publisher = Arc::new(broker.publisher());
        let source = broker.source();

        let insurance = Arc::new(InsuranceHttpClient::new(
            config.collaborators.insurance_url.clone(),
            config.collaborators.retry.clone(),
        ));
        let payments = Arc::new(PaymentsHttpClient::new(
            config.collaborators.payments_url.clone(),
            config.collaborators.retry.clone(),
        ));

        let counters = Arc::new(Counters::default());
        let machine = WorkflowMachine::new(config.triage.clone(), config.billing.clone());
        let dispatcher = Dispatcher::new(
            machine,
            store.clone(),
            publisher,
            insurance,
            payments,
            config.dispatcher.clone(),
            counters.clone(),
        );

        let health_state = HealthState {
            counters,
            store,
            pool_size: config.dispatcher.pool_size,
        };
        let bind = config.health.bind.clone();
        tokio::spawn(async move {
            if let Err(err) = health::serve(&bind, health_state).await {
                error!(error = %err, "health endpoint failed");
            }
        });

        // Held for the lifetime of the run; dropping it would stop the
        // dispatcher.
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        dispatcher.run(source, shutdown_rx).await
    }
}
