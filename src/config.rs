use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    error::HubError,
    models::retry::RetryConfig,
    processor::ProcessorSettings,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: Option<String>,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default = "default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u64,

    pub redis_url: Option<String>,
    #[serde(default = "default_dedup_window_seconds")]
    pub dedup_window_seconds: u64,

    #[serde(default = "default_db_host")]
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default = "default_db_name")]
    pub db_name: String,
    #[serde(default = "default_db_user")]
    pub db_user: String,
    pub db_pass: Option<String>,
    #[serde(default = "default_db_admin_name")]
    pub db_admin_name: String,
    #[serde(default = "default_db_connect_timeout_seconds")]
    pub db_connect_timeout_seconds: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_wait_seconds")]
    pub poll_wait_seconds: u64,
    #[serde(default = "default_poll_delay_seconds")]
    pub poll_delay_seconds: u64,
    #[serde(default = "default_store_backoff_seconds")]
    pub store_backoff_seconds: u64,

    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

/// Connection parameters for the processed-message store.
#[derive(Clone, Debug)]
pub struct StoreSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub admin_database: String,
    pub user: String,
    pub password: Option<String>,
    pub connect_timeout: Duration,
}

impl StoreSettings {
    /// Bootstrap refuses to run without a password; plain sessions still try.
    pub fn require_password(&self) -> Result<&str, HubError> {
        self.password
            .as_deref()
            .ok_or(HubError::MissingConfig("DB_PASS"))
    }
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_pairs(std::env::vars())
    }

    /// Builds a config from `NAME=value` pairs, as `load` does from the environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(pairs)
            .map_err(|e| anyhow!("Invalid environmental variable: {}", e))?;
        Ok(config)
    }

    /// The queue endpoint is the one setting without which neither process can run.
    pub fn queue_url(&self) -> Result<&str, HubError> {
        self.rabbitmq_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(HubError::MissingConfig("RABBITMQ_URL"))
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            host: self.db_host.clone(),
            port: self.db_port,
            database: self.db_name.clone(),
            admin_database: self.db_admin_name.clone(),
            user: self.db_user.clone(),
            password: self.db_pass.clone().filter(|pass| !pass.is_empty()),
            connect_timeout: Duration::from_secs(self.db_connect_timeout_seconds.max(1)),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_connect_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            batch_size: self.batch_size.max(1),
            poll_wait: Duration::from_secs(self.poll_wait_seconds),
            poll_delay: Duration::from_secs(self.poll_delay_seconds),
            store_backoff: Duration::from_secs(self.store_backoff_seconds),
        }
    }
}

fn default_queue_name() -> String {
    "telemetry-hub".to_string()
}

fn default_visibility_timeout_seconds() -> u64 {
    30
}

fn default_dedup_window_seconds() -> u64 {
    300
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "telemetry".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_admin_name() -> String {
    "postgres".to_string()
}

fn default_db_connect_timeout_seconds() -> u64 {
    5
}

fn default_batch_size() -> usize {
    5
}

fn default_poll_wait_seconds() -> u64 {
    10
}

fn default_poll_delay_seconds() -> u64 {
    5
}

fn default_store_backoff_seconds() -> u64 {
    10
}

fn default_max_connect_attempts() -> u32 {
    5
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    10_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8080
}
