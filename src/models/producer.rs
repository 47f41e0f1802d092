use serde::{Deserialize, Serialize};

use crate::models::fault::FaultModel;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerStats {
    pub cycles: u64,
    pub published: u64,
    pub simulated_failures: u64,
    pub corrupted: u64,
    pub publish_failures: u64,
}

/// Snapshot returned by `status`. Model fields are flattened to match `/start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerState {
    pub running: bool,
    #[serde(flatten)]
    pub model: FaultModel,
    pub stats: ProducerStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}
