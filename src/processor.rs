//! At-least-once consumer: poll, persist, then acknowledge.
//!
//! A message is acknowledged only after its record is committed. Anything that
//! fails leaves the message on the queue, and redelivery after the visibility
//! timeout is the only retry.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{Instrument, Span, error, field, info, info_span, warn};

use crate::{
    clients::{
        database::{Store, StoreSession},
        queue::Queue,
    },
    models::message::InboundMessage,
    telemetry::record_exception,
};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub batch_size: usize,
    pub poll_wait: Duration,
    pub poll_delay: Duration,
    pub store_backoff: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            poll_wait: Duration::from_secs(10),
            poll_delay: Duration::from_secs(5),
            store_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    PollFailed,
    Empty,
    StoreUnavailable { abandoned: usize },
    Processed { acknowledged: usize, failed: usize },
}

pub struct Processor {
    queue: Arc<dyn Queue>,
    store: Arc<dyn Store>,
    settings: ProcessorSettings,
}

impl Processor {
    pub fn new(queue: Arc<dyn Queue>, store: Arc<dyn Store>, settings: ProcessorSettings) -> Self {
        Self {
            queue,
            store,
            settings,
        }
    }

    /// Runs until the process exits.
    pub async fn run(&self) {
        info!(
            batch_size = self.settings.batch_size,
            poll_wait_secs = self.settings.poll_wait.as_secs(),
            "Starting processor loop"
        );

        loop {
            let outcome = self.process_batch().await;
            sleep(self.delay_after(&outcome)).await;
        }
    }

    pub fn delay_after(&self, outcome: &BatchOutcome) -> Duration {
        match outcome {
            BatchOutcome::StoreUnavailable { .. } => self.settings.store_backoff,
            _ => self.settings.poll_delay,
        }
    }

    pub async fn process_batch(&self) -> BatchOutcome {
        let span = info_span!(
            "process_batch",
            messages.count = field::Empty,
            error = field::Empty
        );

        self.poll_and_persist(span.clone()).instrument(span).await
    }

    async fn poll_and_persist(&self, span: Span) -> BatchOutcome {
        info!("Polling queue for new messages");
        let messages = match self
            .queue
            .receive_batch(self.settings.batch_size, self.settings.poll_wait)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Error receiving from queue");
                record_exception(&span, &e);
                return BatchOutcome::PollFailed;
            }
        };

        span.record("messages.count", messages.len());

        if messages.is_empty() {
            info!("No messages received in this poll");
            return BatchOutcome::Empty;
        }

        info!(count = messages.len(), "Received messages to process");

        let mut session = match self.store.open_session().await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    error = %e,
                    backoff_secs = self.settings.store_backoff.as_secs(),
                    "Store unavailable, leaving batch on the queue"
                );
                record_exception(&span, &e);
                return BatchOutcome::StoreUnavailable {
                    abandoned: messages.len(),
                };
            }
        };

        let mut acknowledged = 0;
        let mut failed = 0;
        for message in &messages {
            if self.process_message(session.as_mut(), message, &span).await {
                acknowledged += 1;
            } else {
                failed += 1;
            }
        }

        session.close().await;

        BatchOutcome::Processed {
            acknowledged,
            failed,
        }
    }

    async fn process_message(
        &self,
        session: &mut dyn StoreSession,
        message: &InboundMessage,
        batch: &Span,
    ) -> bool {
        let span = info_span!(
            parent: batch,
            "process_message",
            message.id = %message.id,
            error = field::Empty
        );

        async {
            info!(message_id = %message.id, "Processing message");

            if let Err(e) = session.insert_record(&message.id, &message.body).await {
                error!(message_id = %message.id, error = %e, "Error processing message");
                record_exception(&span, &e);
                return false;
            }

            // Committed: from here a failure only means the record may be written again.
            match self.queue.acknowledge(&message.ack_token).await {
                Ok(()) => {
                    info!(message_id = %message.id, "Successfully processed and deleted message");
                    true
                }
                Err(e) => {
                    warn!(message_id = %message.id, error = %e, "Record committed but acknowledge failed");
                    record_exception(&span, &e);
                    false
                }
            }
        }
        .instrument(span.clone())
        .await
    }
}
