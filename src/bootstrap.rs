use tracing::{error, info, warn};

use crate::{
    clients::database::{Catalog, PostgresCatalog},
    config::Config,
    models::record::{BootstrapReport, Provisioned},
};

/// Makes sure the target database and the processed-message table exist.
///
/// Never fails the caller: problems are logged and reported as `Degraded`, and
/// the consumer loop's own connection handling takes over from there.
pub struct StoreBootstrapper<C> {
    catalog: C,
    database: String,
}

impl<C: Catalog> StoreBootstrapper<C> {
    pub fn new(catalog: C, database: impl Into<String>) -> Self {
        Self {
            catalog,
            database: database.into(),
        }
    }

    pub async fn run(&self) -> BootstrapReport {
        match self.catalog.ensure_database(&self.database).await {
            Ok(Provisioned::Created) => {
                info!(database = %self.database, "Database created");
            }
            Ok(Provisioned::AlreadyPresent) => {
                info!(database = %self.database, "Database already exists");
            }
            Err(e) => {
                error!(database = %self.database, error = %e, "Failed to ensure database");
                return BootstrapReport::Degraded(format!("database: {}", e));
            }
        }

        match self.catalog.ensure_table().await {
            Ok(Provisioned::Created) => {
                info!("Table processed_messages created");
                BootstrapReport::Ready
            }
            Ok(Provisioned::AlreadyPresent) => {
                info!("Table processed_messages already exists");
                BootstrapReport::Ready
            }
            Err(e) => {
                error!(error = %e, "Failed to ensure processed_messages table");
                BootstrapReport::Degraded(format!("table: {}", e))
            }
        }
    }
}

/// Bootstraps the PostgreSQL store described by `config`.
pub async fn bootstrap_store(config: &Config) -> BootstrapReport {
    let settings = config.store_settings();
    if let Err(e) = settings.require_password() {
        error!(error = %e, "Skipping store bootstrap; the processor will keep retrying");
        return BootstrapReport::Degraded(e.to_string());
    }

    let database = settings.database.clone();
    let report = StoreBootstrapper::new(PostgresCatalog::new(settings), database)
        .run()
        .await;

    if let BootstrapReport::Degraded(reason) = &report {
        warn!(reason = %reason, "Store bootstrap incomplete, continuing startup");
    }

    report
}
