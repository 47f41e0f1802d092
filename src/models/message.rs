use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body published on the corrupted branch. Deliberately not a `TelemetryEvent`.
pub const CORRUPTED_BODY: &str = "This is a corrupted message.";

/// Ordering domain of a message; FIFO holds only within one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageGroup {
    Normal,
    Corrupted,
    SingleShot,
}

impl MessageGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageGroup::Normal => "telemetry-hub-loadgen",
            MessageGroup::Corrupted => "telemetry-hub-loadgen-corrupted",
            MessageGroup::SingleShot => "telemetry-hub-single",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "telemetry-hub-loadgen" => Some(MessageGroup::Normal),
            "telemetry-hub-loadgen-corrupted" => Some(MessageGroup::Corrupted),
            "telemetry-hub-single" => Some(MessageGroup::SingleShot),
            _ => None,
        }
    }
}

impl Display for MessageGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

/// Well-formed payload carried by normal and single-shot messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub source: String,
    pub sequence: u64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub dedup_id: Uuid,
    pub group: MessageGroup,
    pub body: String,
}

impl OutboundMessage {
    pub fn normal(sequence: u64) -> Self {
        Self::event(MessageGroup::Normal, "loadgen", sequence)
    }

    pub fn single_shot() -> Self {
        Self::event(MessageGroup::SingleShot, "single-invoke", 0)
    }

    pub fn corrupted() -> Self {
        Self {
            dedup_id: Uuid::new_v4(),
            group: MessageGroup::Corrupted,
            body: CORRUPTED_BODY.to_string(),
        }
    }

    fn event(group: MessageGroup, source: &str, sequence: u64) -> Self {
        let event = TelemetryEvent {
            source: source.to_string(),
            sequence,
            generated_at: Utc::now(),
        };

        // Serializing a struct of strings, an integer and a timestamp cannot fail;
        // fall back to a plain-text body rather than panic.
        let body = serde_json::to_string(&event).unwrap_or_else(|_| {
            format!(
                "{} message at {}",
                source,
                event.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
            )
        });

        Self {
            dedup_id: Uuid::new_v4(),
            group,
            body,
        }
    }
}

/// Opaque, single-use handle that removes a received message from its queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken(String);

impl AckToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AckToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub body: String,
    pub group: Option<MessageGroup>,
    pub ack_token: AckToken,
}
