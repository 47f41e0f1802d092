use std::time::Duration;

use async_trait::async_trait;

use crate::{
    error::HubError,
    models::message::{AckToken, InboundMessage, OutboundMessage},
};

/// Ordered, deduplicating, at-least-once channel between the load generator
/// and the processor.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Publishes one message. A dedup id seen inside the dedup window is
    /// suppressed and still reported as success.
    async fn publish(&self, message: &OutboundMessage) -> Result<(), HubError>;

    /// Waits up to `wait` for at least one message, returning at most `max_messages`.
    async fn receive_batch(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<InboundMessage>, HubError>;

    /// Permanently removes a received message. Tokens are single use.
    async fn acknowledge(&self, token: &AckToken) -> Result<(), HubError>;
}
