use anyhow::{Error, Result, anyhow};
use redis::{Client, aio::MultiplexedConnection};
use tracing::info;
use uuid::Uuid;

/// Broker-side dedup window backed by Redis keys that expire with the window.
pub struct DedupWindow {
    connection: MultiplexedConnection,
    namespace: String,
    window_seconds: u64,
}

impl DedupWindow {
    pub async fn connect(
        redis_url: &str,
        namespace: &str,
        window_seconds: u64,
    ) -> Result<Self, Error> {
        info!("Connecting to Redis for deduplication");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!(window_seconds, "Redis dedup window ready");

        Ok(Self {
            connection,
            namespace: namespace.to_string(),
            window_seconds,
        })
    }

    /// Claims `dedup_id` for the window. Returns `false` when it was already claimed.
    pub async fn claim(&self, dedup_id: &Uuid) -> Result<bool, Error> {
        let key = format!("dedup:{}:{}", self.namespace, dedup_id);
        let mut connection = self.connection.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(self.window_seconds.max(1))
            .query_async(&mut connection)
            .await
            .map_err(|e| anyhow!("Failed to claim dedup key: {}", e))?;

        Ok(reply.is_some())
    }
}
