use thiserror::Error;

/// Failures that cross a collaborator boundary (queue, store, configuration).
#[derive(Debug, Error)]
pub enum HubError {
    /// An external call failed; the next cycle or a redelivery is the retry.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("invalid fault model: {0}")]
    InvalidModel(String),

    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("ack token {0} is no longer valid")]
    StaleAckToken(String),
}

impl HubError {
    pub fn transient(context: &str, error: impl std::fmt::Display) -> Self {
        HubError::Transient(format!("{}: {}", context, error))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, HubError::Transient(_) | HubError::StaleAckToken(_))
    }
}
