use std::{process, sync::Arc};

use anyhow::{Error, Result};
use telemetry_hub::{
    api::{ControlState, control_router, serve},
    clients::{health::HealthChecker, queue::Queue, rbmq::RabbitMqQueue},
    config::Config,
    models::health::Dependency,
    producer::LoadGenerator,
    telemetry::init_tracing,
    utils::retry_with_backoff,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = Config::load()?;

    let queue_url = match config.queue_url() {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "FATAL: cannot start load generator");
            process::exit(1);
        }
    };

    info!(
        queue = %config.queue_name,
        endpoint = %redact(queue_url),
        "Load generator starting"
    );

    let broker = Arc::new(RabbitMqQueue::new(&config).await?);
    if let Err(e) =
        retry_with_backoff(&config.retry_config(), "broker connect", || broker.ensure_connected())
            .await
    {
        warn!(error = %e, "RabbitMQ unreachable at startup, reconnecting on each publish");
    }
    let queue: Arc<dyn Queue> = broker;

    let generator = Arc::new(LoadGenerator::new(queue));

    let state = Arc::new(ControlState {
        generator: Arc::clone(&generator),
        health_checker: HealthChecker::new(
            config.clone(),
            vec![Dependency::MessageBroker, Dependency::DedupCache],
        ),
    });

    let served = serve(control_router(state), config.server_port).await;

    generator.stop().await;

    served
}

/// Drops credentials from an AMQP URL before it is logged.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
