use std::{collections::HashMap, time::Duration};

use chrono::Utc;
use lapin::{Connection, ConnectionProperties};
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::{
    clients::database::PostgresStore,
    config::Config,
    error::HubError,
    models::health::{Dependency, HealthCheckResponse, ServiceHealth, overall_status},
};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks the dependencies a process relies on. Each check opens a throwaway
/// connection and closes it again.
pub struct HealthChecker {
    config: Config,
    dependencies: Vec<Dependency>,
}

impl HealthChecker {
    pub fn new(config: Config, dependencies: Vec<Dependency>) -> Self {
        Self {
            config,
            dependencies,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        for &dependency in &self.dependencies {
            checks.insert(dependency, self.check(dependency).await);
        }

        HealthCheckResponse {
            status: overall_status(&checks),
            timestamp: Utc::now(),
            checks: checks
                .into_iter()
                .map(|(dependency, health)| (dependency.as_str().to_string(), health))
                .collect(),
        }
    }

    async fn check(&self, dependency: Dependency) -> ServiceHealth {
        if dependency == Dependency::DedupCache && self.config.redis_url.is_none() {
            return ServiceHealth::not_configured();
        }

        let start = Instant::now();
        let reached = match timeout(CHECK_TIMEOUT, self.reach(dependency)).await {
            Ok(reached) => reached,
            Err(_) => Err(HubError::Transient(format!(
                "no answer within {}s",
                CHECK_TIMEOUT.as_secs()
            ))),
        };

        match reached {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(dependency = dependency.as_str(), response_time_ms = elapsed, "Health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(dependency = dependency.as_str(), error = %e, "Health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    async fn reach(&self, dependency: Dependency) -> Result<(), HubError> {
        match dependency {
            Dependency::Database => {
                PostgresStore::new(self.config.store_settings())
                    .health_check()
                    .await
            }
            Dependency::MessageBroker => reach_broker(self.config.queue_url()?).await,
            Dependency::DedupCache => match self.config.redis_url.as_deref() {
                Some(url) => reach_cache(url).await,
                None => Ok(()),
            },
        }
    }
}

async fn reach_broker(url: &str) -> Result<(), HubError> {
    let connection = Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(|e| HubError::transient("broker connect", e))?;

    connection
        .close(200, "health check")
        .await
        .map_err(|e| HubError::transient("broker close", e))
}

async fn reach_cache(url: &str) -> Result<(), HubError> {
    let client = redis::Client::open(url).map_err(|e| HubError::transient("cache client", e))?;
    let mut connection = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| HubError::transient("cache connect", e))?;

    let _: String = redis::cmd("PING")
        .query_async(&mut connection)
        .await
        .map_err(|e| HubError::transient("cache ping", e))?;

    Ok(())
}
