use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use telemetry_hub::{
    bootstrap::{StoreBootstrapper, bootstrap_store},
    clients::database::{Catalog, is_already_exists, quote_identifier},
    error::HubError,
    models::record::{BootstrapReport, Provisioned},
};
use tokio_postgres::error::SqlState;

use crate::common::config_with;

/// Catalog that remembers what it has created, like a real server would.
#[derive(Default)]
struct RecordingCatalog {
    databases: Mutex<Vec<String>>,
    table_created: Mutex<bool>,
    fail_database: bool,
    fail_table: bool,
}

#[async_trait]
impl Catalog for RecordingCatalog {
    async fn ensure_database(&self, name: &str) -> Result<Provisioned, HubError> {
        if self.fail_database {
            return Err(HubError::Transient("connect: admin database down".to_string()));
        }
        let mut databases = self.databases.lock().unwrap();
        if databases.iter().any(|existing| existing == name) {
            return Ok(Provisioned::AlreadyPresent);
        }
        databases.push(name.to_string());
        Ok(Provisioned::Created)
    }

    async fn ensure_table(&self) -> Result<Provisioned, HubError> {
        if self.fail_table {
            return Err(HubError::Transient("create table: permission denied".to_string()));
        }
        let mut created = self.table_created.lock().unwrap();
        if *created {
            return Ok(Provisioned::AlreadyPresent);
        }
        *created = true;
        Ok(Provisioned::Created)
    }
}

/// Catalog that loses the check-then-create race on every call.
struct RacingCatalog;

#[async_trait]
impl Catalog for RacingCatalog {
    async fn ensure_database(&self, _name: &str) -> Result<Provisioned, HubError> {
        Ok(Provisioned::AlreadyPresent)
    }

    async fn ensure_table(&self) -> Result<Provisioned, HubError> {
        Ok(Provisioned::AlreadyPresent)
    }
}

/// Test: Running the bootstrap twice is a no-op the second time
#[tokio::test]
async fn test_bootstrap_is_idempotent() -> Result<()> {
    let bootstrapper = StoreBootstrapper::new(RecordingCatalog::default(), "telemetry");

    assert_eq!(bootstrapper.run().await, BootstrapReport::Ready);
    assert_eq!(bootstrapper.run().await, BootstrapReport::Ready);

    Ok(())
}

/// Test: Objects that already exist count as success
#[tokio::test]
async fn test_already_present_is_success() -> Result<()> {
    let report = StoreBootstrapper::new(RacingCatalog, "telemetry").run().await;
    assert!(report.is_ready());
    Ok(())
}

/// Test: Database failure degrades the bootstrap and skips table creation
#[tokio::test]
async fn test_database_failure_degrades() -> Result<()> {
    let catalog = RecordingCatalog {
        fail_database: true,
        ..Default::default()
    };
    let bootstrapper = StoreBootstrapper::new(catalog, "telemetry");

    let report = bootstrapper.run().await;

    assert!(matches!(report, BootstrapReport::Degraded(ref reason) if reason.starts_with("database")));
    Ok(())
}

/// Test: Table failure degrades the bootstrap without panicking
#[tokio::test]
async fn test_table_failure_degrades() -> Result<()> {
    let catalog = RecordingCatalog {
        fail_table: true,
        ..Default::default()
    };
    let report = StoreBootstrapper::new(catalog, "telemetry").run().await;

    assert!(matches!(report, BootstrapReport::Degraded(ref reason) if reason.starts_with("table")));
    Ok(())
}

/// Test: Missing database password stops the bootstrap but not the caller
#[tokio::test]
async fn test_missing_password_degrades_without_connecting() -> Result<()> {
    let config = config_with(&[("RABBITMQ_URL", "amqp://localhost:5672/%2f")]);

    let report = bootstrap_store(&config).await;

    assert!(matches!(report, BootstrapReport::Degraded(ref reason) if reason.contains("DB_PASS")));
    Ok(())
}

/// Test: PostgreSQL "already exists" states are recognised, others are not
#[test]
fn test_already_exists_classification() {
    assert!(is_already_exists(&SqlState::DUPLICATE_DATABASE));
    assert!(is_already_exists(&SqlState::DUPLICATE_TABLE));
    assert!(is_already_exists(&SqlState::UNIQUE_VIOLATION));
    assert!(!is_already_exists(&SqlState::INSUFFICIENT_PRIVILEGE));
    assert!(!is_already_exists(&SqlState::INVALID_PASSWORD));
}

/// Test: Database names are quoted as identifiers
#[test]
fn test_identifier_quoting() {
    assert_eq!(quote_identifier("telemetry"), "\"telemetry\"");
    assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
}
