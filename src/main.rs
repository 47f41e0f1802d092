use std::{process, sync::Arc};

use anyhow::{Error, Result};
use telemetry_hub::{
    api::{ProcessorState, processor_router, serve},
    bootstrap::bootstrap_store,
    clients::{
        database::{PostgresStore, Store},
        health::HealthChecker,
        queue::Queue,
        rbmq::RabbitMqQueue,
    },
    config::Config,
    models::health::Dependency,
    processor::Processor,
    telemetry::init_tracing,
    utils::retry_with_backoff,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = Config::load()?;

    if let Err(e) = config.queue_url() {
        error!(error = %e, "FATAL: cannot start processor");
        process::exit(1);
    }

    info!(
        queue = %config.queue_name,
        db_host = %config.db_host,
        db_name = %config.db_name,
        db_user = %config.db_user,
        "Telemetry processor starting"
    );

    bootstrap_store(&config).await;

    let broker = Arc::new(RabbitMqQueue::new(&config).await?);
    if let Err(e) =
        retry_with_backoff(&config.retry_config(), "broker connect", || broker.ensure_connected())
            .await
    {
        warn!(error = %e, "RabbitMQ unreachable at startup, reconnecting on each poll");
    }
    let queue: Arc<dyn Queue> = broker;
    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(config.store_settings()));

    let processor = Processor::new(queue, Arc::clone(&store), config.processor_settings());

    let state = Arc::new(ProcessorState {
        store,
        health_checker: HealthChecker::new(
            config.clone(),
            vec![Dependency::Database, Dependency::MessageBroker],
        ),
    });

    tokio::select! {
        _ = processor.run() => Ok(()),
        served = serve(processor_router(state), config.server_port) => served,
    }
}
