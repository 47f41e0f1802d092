//! In-process queue and store with the same contracts as the broker and
//! PostgreSQL adapters. Both expose switches for injecting failures.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    sync::Notify,
    time::{Instant, timeout_at},
};
use uuid::Uuid;

use crate::{
    clients::{
        database::{Store, StoreSession},
        queue::Queue,
    },
    error::HubError,
    models::{
        message::{AckToken, InboundMessage, MessageGroup, OutboundMessage},
        record::ProcessedRecord,
    },
};

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    id: String,
    group: MessageGroup,
    body: String,
}

#[derive(Debug, Clone)]
pub struct PublishedEntry {
    pub dedup_id: Uuid,
    pub group: MessageGroup,
    pub body: String,
    pub published_at: Instant,
}

#[derive(Default)]
struct QueueInner {
    next_seq: u64,
    ready: BTreeMap<u64, StoredMessage>,
    in_flight: HashMap<String, (StoredMessage, Instant)>,
    dedup: HashMap<Uuid, Instant>,
    log: Vec<PublishedEntry>,
}

pub struct MemoryQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    dedup_window: Duration,
    visibility_timeout: Duration,
    unreachable: AtomicBool,
}

impl MemoryQueue {
    pub fn new(dedup_window: Duration, visibility_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            dedup_window,
            visibility_timeout,
            unreachable: AtomicBool::new(false),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Every accepted (non-duplicate) publish, in order.
    pub fn published(&self) -> Vec<PublishedEntry> {
        self.lock().log.clone()
    }

    /// Messages visible to the next receive plus those currently in flight.
    pub fn depth(&self) -> usize {
        let inner = self.lock();
        inner.ready.len() + inner.in_flight.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_reachable(&self, operation: &str) -> Result<(), HubError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(HubError::Transient(format!(
                "{}: queue endpoint unreachable",
                operation
            )));
        }
        Ok(())
    }

    /// Returns timed-out in-flight messages to the ready set, then takes up to
    /// `max` messages in publish order.
    fn take_visible(&self, max: usize) -> Vec<InboundMessage> {
        let mut inner = self.lock();
        let now = Instant::now();

        let expired: Vec<String> = inner
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((message, _)) = inner.in_flight.remove(&receipt) {
                inner.ready.insert(message.seq, message);
            }
        }

        // FIFO per group: nothing newer is handed out while a group has a
        // message in flight from an earlier receive.
        let blocked: HashSet<MessageGroup> = inner
            .in_flight
            .values()
            .map(|(message, _)| message.group)
            .collect();

        let taken: Vec<StoredMessage> = inner
            .ready
            .values()
            .filter(|message| !blocked.contains(&message.group))
            .take(max)
            .cloned()
            .collect();

        let deadline = now + self.visibility_timeout;
        let mut batch = Vec::with_capacity(taken.len());
        for message in taken {
            inner.ready.remove(&message.seq);
            let receipt = Uuid::new_v4().to_string();
            batch.push(InboundMessage {
                id: message.id.clone(),
                body: message.body.clone(),
                group: Some(message.group),
                ack_token: AckToken::new(receipt.clone()),
            });
            inner.in_flight.insert(receipt, (message, deadline));
        }
        batch
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), HubError> {
        self.check_reachable("publish")?;

        {
            let mut inner = self.lock();
            let now = Instant::now();
            let window = self.dedup_window;
            inner.dedup.retain(|_, seen_at| now.duration_since(*seen_at) < window);

            if inner.dedup.contains_key(&message.dedup_id) {
                return Ok(());
            }
            inner.dedup.insert(message.dedup_id, now);

            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.ready.insert(
                seq,
                StoredMessage {
                    seq,
                    id: message.dedup_id.to_string(),
                    group: message.group,
                    body: message.body.clone(),
                },
            );
            inner.log.push(PublishedEntry {
                dedup_id: message.dedup_id,
                group: message.group,
                body: message.body.clone(),
                published_at: now,
            });
        }

        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, HubError> {
        self.check_reachable("receive")?;

        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let batch = self.take_visible(max_messages);
            if !batch.is_empty() {
                return Ok(batch);
            }

            // Wake on publish, or when the earliest in-flight message times out.
            let wake_at = self
                .lock()
                .in_flight
                .values()
                .map(|(_, visible_at)| *visible_at)
                .min()
                .map_or(deadline, |visible_at| visible_at.min(deadline));

            if timeout_at(wake_at, notified).await.is_err() && wake_at >= deadline {
                return Ok(self.take_visible(max_messages));
            }
        }
    }

    async fn acknowledge(&self, token: &AckToken) -> Result<(), HubError> {
        self.check_reachable("acknowledge")?;

        let mut inner = self.lock();
        match inner.in_flight.remove(token.as_str()) {
            Some(_) => Ok(()),
            None => Err(HubError::StaleAckToken(token.to_string())),
        }
    }
}

#[derive(Default)]
struct StoreInner {
    next_id: i32,
    records: Vec<ProcessedRecord>,
    failing_contents: HashSet<String>,
    sessions_opened: u64,
}

pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
    unreachable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            unreachable: AtomicBool::new(false),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Inserts whose content equals `content` fail until `heal` is called.
    pub fn fail_content(&self, content: &str) {
        lock_store(&self.inner)
            .failing_contents
            .insert(content.to_string());
    }

    pub fn heal(&self) {
        lock_store(&self.inner).failing_contents.clear();
    }

    pub fn records(&self) -> Vec<ProcessedRecord> {
        lock_store(&self.inner).records.clone()
    }

    pub fn sessions_opened(&self) -> u64 {
        lock_store(&self.inner).sessions_opened
    }
}

fn lock_store(inner: &Mutex<StoreInner>) -> MutexGuard<'_, StoreInner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct MemorySession {
    inner: Arc<Mutex<StoreInner>>,
}

#[async_trait]
impl Store for MemoryStore {
    async fn open_session(&self) -> Result<Box<dyn StoreSession>, HubError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(HubError::Transient(
                "connect: store unreachable".to_string(),
            ));
        }
        lock_store(&self.inner).sessions_opened += 1;
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn count_records(&self) -> Result<i64, HubError> {
        Ok(lock_store(&self.inner).records.len() as i64)
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn insert_record(&mut self, message_id: &str, content: &str) -> Result<(), HubError> {
        let mut inner = lock_store(&self.inner);
        if inner.failing_contents.contains(content) {
            return Err(HubError::Transient(format!(
                "insert: rejected content for message {}",
                message_id
            )));
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.records.push(ProcessedRecord {
            id,
            message_id: message_id.to_string(),
            content: content.to_string(),
            processed_at: Utc::now(),
        });
        Ok(())
    }

    async fn close(self: Box<Self>) {}
}
