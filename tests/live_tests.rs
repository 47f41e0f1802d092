//! Run against real services with `cargo test -- --ignored` and the usual
//! `RABBITMQ_URL`, `REDIS_URL` and `DB_*` variables.

use std::time::Duration;

use anyhow::Result;
use telemetry_hub::{
    bootstrap::bootstrap_store,
    clients::{
        database::{Catalog, PostgresCatalog, PostgresStore, Store, StoreSession},
        queue::Queue,
        rbmq::RabbitMqQueue,
    },
    config::Config,
    models::{
        message::OutboundMessage,
        record::{BootstrapReport, Provisioned},
    },
};

/// Test: Provisioning twice against PostgreSQL reports the objects as present
#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_postgres_provisioning_is_idempotent() -> Result<()> {
    let config = Config::load()?;
    assert_eq!(bootstrap_store(&config).await, BootstrapReport::Ready);

    let catalog = PostgresCatalog::new(config.store_settings());
    assert_eq!(
        catalog.ensure_database(&config.db_name).await?,
        Provisioned::AlreadyPresent
    );
    assert_eq!(catalog.ensure_table().await?, Provisioned::AlreadyPresent);

    Ok(())
}

/// Test: The same message id can be stored twice (redelivery is not an error)
#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_postgres_accepts_duplicate_message_ids() -> Result<()> {
    let config = Config::load()?;
    bootstrap_store(&config).await;

    let store = PostgresStore::new(config.store_settings());
    let before = store.count_records().await?;

    let message_id = format!("test_dup_{}", uuid::Uuid::new_v4());
    let mut session = store.open_session().await?;
    session.insert_record(&message_id, "first delivery").await?;
    session.insert_record(&message_id, "second delivery").await?;
    session.close().await;

    assert_eq!(store.count_records().await?, before + 2);
    Ok(())
}

/// Test: Published messages come back from RabbitMQ and can be acknowledged once
#[tokio::test]
#[ignore = "requires RabbitMQ"]
async fn test_rabbitmq_publish_receive_acknowledge() -> Result<()> {
    let mut config = Config::load()?;
    config.queue_name = format!("telemetry-hub-test-{}", uuid::Uuid::new_v4());

    let queue = RabbitMqQueue::connect(&config).await?;
    let outbound = OutboundMessage::single_shot();
    queue.publish(&outbound).await?;

    let batch = queue.receive_batch(5, Duration::from_secs(5)).await?;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, outbound.dedup_id.to_string());
    assert_eq!(batch[0].body, outbound.body);

    queue.acknowledge(&batch[0].ack_token).await?;
    assert!(queue.acknowledge(&batch[0].ack_token).await.is_err());

    Ok(())
}
