use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{
        BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::{
    clients::{dedup::DedupWindow, queue::Queue},
    config::Config,
    error::HubError,
    models::message::{AckToken, InboundMessage, MessageGroup, OutboundMessage},
};

const EMPTY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on deliveries of blocked groups held back during one receive.
const MAX_HELD_BACK: usize = 100;

/// Deliveries handed out on the current channel and not yet settled.
///
/// Delivery tags are only meaningful on the channel that issued them, so
/// every reconnect starts a new generation and forgets the old tags. Ack
/// tokens carry the generation they were issued under.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    generation: u64,
    deliveries: HashMap<u64, Delivery>,
}

#[derive(Debug)]
struct Delivery {
    received_at: Instant,
    group: Option<MessageGroup>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forgets every outstanding delivery and returns the new generation.
    pub fn reset(&mut self) -> u64 {
        self.generation += 1;
        self.deliveries.clear();
        self.generation
    }

    /// Tracks a delivery received under `generation`. `None` when the channel
    /// it came from has since been replaced.
    pub fn record(
        &mut self,
        generation: u64,
        tag: u64,
        group: Option<MessageGroup>,
        received_at: Instant,
    ) -> Option<AckToken> {
        if generation != self.generation {
            return None;
        }
        self.deliveries.insert(tag, Delivery { received_at, group });
        Some(AckToken::new(format!("{}.{}", generation, tag)))
    }

    /// Resolves `token` to its delivery tag and stops tracking it.
    pub fn settle(&mut self, token: &AckToken) -> Result<u64, HubError> {
        let stale = || HubError::StaleAckToken(token.to_string());

        let (generation, tag) = token.as_str().split_once('.').ok_or_else(stale)?;
        let generation: u64 = generation.parse().map_err(|_| stale())?;
        let tag: u64 = tag.parse().map_err(|_| stale())?;

        if generation != self.generation || self.deliveries.remove(&tag).is_none() {
            return Err(stale());
        }
        Ok(tag)
    }

    /// Removes and returns the tags whose visibility timeout has elapsed.
    pub fn take_expired(&mut self, now: Instant, visibility_timeout: Duration) -> Vec<u64> {
        let mut expired: Vec<u64> = self
            .deliveries
            .iter()
            .filter(|(_, delivery)| now.duration_since(delivery.received_at) >= visibility_timeout)
            .map(|(tag, _)| *tag)
            .collect();
        expired.sort_unstable();
        for tag in &expired {
            self.deliveries.remove(tag);
        }
        expired
    }

    /// Groups with an unsettled delivery. Newer messages of these groups must
    /// wait until it is acknowledged or its visibility timeout elapses.
    pub fn blocked_groups(&self) -> HashSet<MessageGroup> {
        self.deliveries
            .values()
            .filter_map(|delivery| delivery.group)
            .collect()
    }

    pub fn outstanding(&self) -> usize {
        self.deliveries.len()
    }
}

struct Link {
    connection: Connection,
    channel: Channel,
    generation: u64,
}

impl Link {
    fn close(self) {
        tokio::spawn(async move {
            if let Err(e) = self.connection.close(200, "reconnecting").await {
                debug!(error = %e, "Closing stale RabbitMQ connection failed");
            }
        });
    }
}

struct Fetched {
    tag: u64,
    id: String,
    body: String,
    group: Option<MessageGroup>,
}

/// AMQP-backed queue. Deliveries not acknowledged within the visibility
/// timeout are handed back to the broker on the next receive.
///
/// The broker connection is opened on first use and reopened after it fails.
pub struct RabbitMqQueue {
    url: String,
    queue_name: String,
    visibility_timeout: Duration,
    link: tokio::sync::Mutex<Option<Link>>,
    ledger: Mutex<DeliveryLedger>,
    dedup: Option<DedupWindow>,
}

impl RabbitMqQueue {
    /// Builds the adapter without contacting the broker.
    pub async fn new(config: &Config) -> Result<Self, HubError> {
        let url = config.queue_url()?.to_string();

        let dedup = match config.redis_url.as_deref() {
            Some(redis_url) => {
                match DedupWindow::connect(
                    redis_url,
                    &config.queue_name,
                    config.dedup_window_seconds,
                )
                .await
                {
                    Ok(window) => Some(window),
                    Err(e) => {
                        warn!(error = %e, "Dedup window unavailable, publishing without it");
                        None
                    }
                }
            }
            None => {
                info!("REDIS_URL not set, dedup window disabled");
                None
            }
        };

        Ok(Self {
            url,
            queue_name: config.queue_name.clone(),
            visibility_timeout: Duration::from_secs(config.visibility_timeout_seconds),
            link: tokio::sync::Mutex::new(None),
            ledger: Mutex::new(DeliveryLedger::new()),
            dedup,
        })
    }

    /// Builds the adapter and opens the broker connection right away.
    pub async fn connect(config: &Config) -> Result<Self, HubError> {
        let queue = Self::new(config).await?;
        queue.ensure_connected().await?;
        Ok(queue)
    }

    pub async fn ensure_connected(&self) -> Result<(), HubError> {
        self.channel().await.map(|_| ())
    }

    fn ledger(&self) -> MutexGuard<'_, DeliveryLedger> {
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The live channel and its generation, reconnecting when needed.
    async fn channel(&self) -> Result<(Channel, u64), HubError> {
        let mut link = self.link.lock().await;

        if let Some(current) = link.as_ref() {
            if current.channel.status().connected() {
                return Ok((current.channel.clone(), current.generation));
            }
            warn!(queue = %self.queue_name, "RabbitMQ channel lost, reconnecting");
        }
        if let Some(stale) = link.take() {
            stale.close();
        }

        let generation = self.ledger().reset();
        let fresh = self.open_link(generation).await?;
        let handle = (fresh.channel.clone(), generation);
        *link = Some(fresh);

        Ok(handle)
    }

    async fn open_link(&self, generation: u64) -> Result<Link, HubError> {
        info!(queue = %self.queue_name, "Connecting to RabbitMQ");

        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| HubError::transient("connect", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| HubError::transient("create channel", e))?;

        channel
            .queue_declare(
                self.queue_name.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| HubError::transient("declare queue", e))?;

        info!(queue = %self.queue_name, generation, "RabbitMQ queue declared");

        Ok(Link {
            connection,
            channel,
            generation,
        })
    }

    /// Drops the link after a failed call so the next operation reconnects.
    async fn drop_link(&self) {
        if let Some(stale) = self.link.lock().await.take() {
            self.ledger().reset();
            stale.close();
        }
    }

    async fn requeue(&self, channel: &Channel, tags: &[u64]) {
        for &tag in tags {
            let options = BasicNackOptions {
                multiple: false,
                requeue: true,
            };
            if let Err(e) = channel.basic_nack(tag, options).await {
                warn!(delivery_tag = tag, error = %e, "Failed to requeue delivery");
            }
        }
    }

    async fn get_one(&self, channel: &Channel) -> Result<Option<Fetched>, HubError> {
        let message = channel
            .basic_get(self.queue_name.as_str(), BasicGetOptions { no_ack: false })
            .await
            .map_err(|e| HubError::transient("receive", e))?;

        let Some(message) = message else {
            return Ok(None);
        };

        let delivery = message.delivery;
        let tag = delivery.delivery_tag;
        let id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_string())
            .unwrap_or_else(|| format!("delivery-{}", tag));
        let group = delivery
            .properties
            .kind()
            .as_ref()
            .and_then(|kind| MessageGroup::from_wire(kind.as_str()));

        Ok(Some(Fetched {
            tag,
            id,
            body: String::from_utf8_lossy(&delivery.data).into_owned(),
            group,
        }))
    }

    async fn fill_batch(
        &self,
        channel: &Channel,
        generation: u64,
        max_messages: usize,
        wait: Duration,
        held_back: &mut Vec<u64>,
    ) -> Result<Vec<InboundMessage>, HubError> {
        let blocked = self.ledger().blocked_groups();
        let deadline = Instant::now() + wait;
        let mut batch = Vec::with_capacity(max_messages);

        while batch.len() < max_messages && held_back.len() < MAX_HELD_BACK {
            let Some(fetched) = self.get_one(channel).await? else {
                // Long poll: return what we hold, or keep waiting until the deadline.
                if !batch.is_empty() || Instant::now() >= deadline {
                    break;
                }
                sleep(EMPTY_POLL_INTERVAL.min(deadline - Instant::now())).await;
                continue;
            };

            if fetched.group.is_some_and(|group| blocked.contains(&group)) {
                held_back.push(fetched.tag);
                continue;
            }

            let token = self
                .ledger()
                .record(generation, fetched.tag, fetched.group, Instant::now());
            if let Some(ack_token) = token {
                batch.push(InboundMessage {
                    id: fetched.id,
                    body: fetched.body,
                    group: fetched.group,
                    ack_token,
                });
            }
        }

        Ok(batch)
    }
}

#[async_trait]
impl Queue for RabbitMqQueue {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), HubError> {
        if let Some(dedup) = &self.dedup {
            match dedup.claim(&message.dedup_id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(dedup_id = %message.dedup_id, "Duplicate publish suppressed");
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "Dedup check failed, publishing anyway"),
            }
        }

        let (channel, _) = self.channel().await?;
        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_message_id(message.dedup_id.to_string().into())
            .with_type(message.group.as_str().to_string().into());

        let published = channel
            .basic_publish(
                "",
                self.queue_name.as_str(),
                BasicPublishOptions::default(),
                message.body.as_bytes(),
                properties,
            )
            .await;

        if let Err(e) = published {
            self.drop_link().await;
            return Err(HubError::transient("publish", e));
        }

        Ok(())
    }

    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, HubError> {
        let (channel, generation) = self.channel().await?;

        let expired = self
            .ledger()
            .take_expired(Instant::now(), self.visibility_timeout);
        if !expired.is_empty() {
            debug!(count = expired.len(), "Visibility timeout elapsed, requeueing");
            self.requeue(&channel, &expired).await;
        }

        let mut held_back = Vec::new();
        let filled = self
            .fill_batch(&channel, generation, max_messages, wait, &mut held_back)
            .await;

        // Held deliveries go back in their original order behind the blocking one.
        if !held_back.is_empty() {
            debug!(count = held_back.len(), "Holding back messages of in-flight groups");
            self.requeue(&channel, &held_back).await;
        }

        match filled {
            Ok(batch) => Ok(batch),
            Err(e) => {
                self.drop_link().await;
                Err(e)
            }
        }
    }

    async fn acknowledge(&self, token: &AckToken) -> Result<(), HubError> {
        let (channel, _) = self.channel().await?;
        let tag = self.ledger().settle(token)?;

        if let Err(e) = channel.basic_ack(tag, BasicAckOptions::default()).await {
            self.drop_link().await;
            return Err(HubError::transient("acknowledge", e));
        }

        Ok(())
    }
}
