use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, error::SqlState};
use tracing::{debug, error, info, warn};

use crate::{config::StoreSettings, error::HubError, models::record::Provisioned};

pub const PROCESSED_TABLE: &str = "public.processed_messages";

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS public.processed_messages (
        id SERIAL PRIMARY KEY,
        message_id VARCHAR(255) NOT NULL,
        content TEXT,
        processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

/// Durable home of processed-message records.
#[async_trait]
pub trait Store: Send + Sync {
    /// One session is opened per consumer batch.
    async fn open_session(&self) -> Result<Box<dyn StoreSession>, HubError>;

    async fn count_records(&self) -> Result<i64, HubError>;
}

#[async_trait]
pub trait StoreSession: Send {
    /// Inserts and commits one record. `Ok` means the commit is durable.
    async fn insert_record(&mut self, message_id: &str, content: &str) -> Result<(), HubError>;

    async fn close(self: Box<Self>);
}

/// Provisioning of the database and the processed-message table.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn ensure_database(&self, name: &str) -> Result<Provisioned, HubError>;

    async fn ensure_table(&self) -> Result<Provisioned, HubError>;
}

/// "Already exists" outcomes of concurrent provisioning count as success.
pub fn is_already_exists(state: &SqlState) -> bool {
    *state == SqlState::DUPLICATE_DATABASE
        || *state == SqlState::DUPLICATE_TABLE
        || *state == SqlState::DUPLICATE_OBJECT
        || *state == SqlState::UNIQUE_VIOLATION
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Connection parameters for `database`. A silent host fails after `connect_timeout`.
pub fn pg_config(settings: &StoreSettings, database: &str) -> tokio_postgres::Config {
    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host(&settings.host)
        .port(settings.port)
        .user(&settings.user)
        .dbname(database)
        .connect_timeout(settings.connect_timeout);
    if let Some(password) = &settings.password {
        pg_config.password(password);
    }
    pg_config
}

async fn connect(settings: &StoreSettings, database: &str) -> Result<Client, HubError> {
    let (client, connection) = pg_config(settings, database)
        .connect(NoTls)
        .await
        .map_err(|e| HubError::transient("connect", e))?;

    let database = database.to_string();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!(database = %database, error = %e, "PostgreSQL connection closed with error");
        }
    });

    Ok(client)
}

pub struct PostgresStore {
    settings: StoreSettings,
}

impl PostgresStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self { settings }
    }

    pub async fn health_check(&self) -> Result<(), HubError> {
        let client = connect(&self.settings, &self.settings.database).await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| HubError::transient("health check", e))?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>, HubError> {
        let client = connect(&self.settings, &self.settings.database).await?;
        debug!("Store session opened");
        Ok(Box::new(PostgresSession { client }))
    }

    async fn count_records(&self) -> Result<i64, HubError> {
        let client = connect(&self.settings, &self.settings.database).await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM public.processed_messages", &[])
            .await
            .map_err(|e| HubError::transient("count", e))?;
        Ok(row.get(0))
    }
}

struct PostgresSession {
    client: Client,
}

#[async_trait]
impl StoreSession for PostgresSession {
    async fn insert_record(&mut self, message_id: &str, content: &str) -> Result<(), HubError> {
        let transaction = self
            .client
            .transaction()
            .await
            .map_err(|e| HubError::transient("begin", e))?;

        transaction
            .execute(
                "INSERT INTO public.processed_messages (message_id, content) VALUES ($1, $2)",
                &[&message_id, &content],
            )
            .await
            .map_err(|e| {
                error!(message_id, error = %e, "Failed to insert processed record");
                HubError::transient("insert", e)
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| HubError::transient("commit", e))?;

        Ok(())
    }

    async fn close(self: Box<Self>) {
        drop(self.client);
        debug!("Store session closed");
    }
}

pub struct PostgresCatalog {
    settings: StoreSettings,
}

impl PostgresCatalog {
    pub fn new(settings: StoreSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn ensure_database(&self, name: &str) -> Result<Provisioned, HubError> {
        let admin = connect(&self.settings, &self.settings.admin_database).await?;

        let existing = admin
            .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&name])
            .await
            .map_err(|e| HubError::transient("database lookup", e))?;
        if existing.is_some() {
            return Ok(Provisioned::AlreadyPresent);
        }

        info!(database = name, "Creating database");
        match admin
            .batch_execute(&format!("CREATE DATABASE {}", quote_identifier(name)))
            .await
        {
            Ok(()) => Ok(Provisioned::Created),
            Err(e) if e.code().is_some_and(is_already_exists) => {
                debug!(database = name, "Database created concurrently");
                Ok(Provisioned::AlreadyPresent)
            }
            Err(e) => Err(HubError::transient("create database", e)),
        }
    }

    async fn ensure_table(&self) -> Result<Provisioned, HubError> {
        let client = connect(&self.settings, &self.settings.database).await?;

        let existing = client
            .query_one("SELECT to_regclass($1) IS NOT NULL", &[&PROCESSED_TABLE])
            .await
            .map_err(|e| HubError::transient("table lookup", e))?;
        let present: bool = existing.get(0);

        match client.batch_execute(CREATE_TABLE_SQL).await {
            Ok(()) if present => Ok(Provisioned::AlreadyPresent),
            Ok(()) => Ok(Provisioned::Created),
            Err(e) if e.code().is_some_and(is_already_exists) => Ok(Provisioned::AlreadyPresent),
            Err(e) => Err(HubError::transient("create table", e)),
        }
    }
}
