use std::{sync::Arc, time::Duration};

use telemetry_hub::{
    clients::memory::{MemoryQueue, MemoryStore},
    config::Config,
    models::message::{MessageGroup, OutboundMessage},
    processor::{Processor, ProcessorSettings},
};
use uuid::Uuid;

pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(15);

pub fn memory_queue() -> Arc<MemoryQueue> {
    Arc::new(MemoryQueue::new(Duration::from_secs(300), VISIBILITY_TIMEOUT))
}

pub fn processor_settings() -> ProcessorSettings {
    ProcessorSettings {
        batch_size: 5,
        poll_wait: Duration::from_secs(10),
        poll_delay: Duration::from_secs(5),
        store_backoff: Duration::from_secs(10),
    }
}

pub fn processor(queue: &Arc<MemoryQueue>, store: &Arc<MemoryStore>) -> Processor {
    Processor::new(queue.clone(), store.clone(), processor_settings())
}

pub fn message(body: &str) -> OutboundMessage {
    OutboundMessage {
        dedup_id: Uuid::new_v4(),
        group: MessageGroup::Normal,
        body: body.to_string(),
    }
}

pub fn config_with(pairs: &[(&str, &str)]) -> Config {
    Config::from_pairs(
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string())),
    )
    .expect("test config should parse")
}
