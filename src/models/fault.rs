use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::HubError;

/// Traffic shape and fault mix applied by the load generator.
///
/// Field names on the wire follow the control surface (`rpm`, `error_rate`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultModel {
    #[serde(rename = "rpm", default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(rename = "error_rate", default)]
    pub error_rate_percent: u32,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(rename = "corruption_rate", default)]
    pub corruption_rate_percent: u32,
}

/// What a single producer cycle does. Exactly one outcome per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleOutcome {
    SimulatedFailure,
    Corrupted,
    Normal,
}

impl Default for FaultModel {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            error_rate_percent: 0,
            latency_ms: 0,
            corruption_rate_percent: 0,
        }
    }
}

impl FaultModel {
    pub fn new(
        requests_per_minute: u32,
        error_rate_percent: u32,
        latency_ms: u64,
        corruption_rate_percent: u32,
    ) -> Result<Self, HubError> {
        let model = Self {
            requests_per_minute,
            error_rate_percent,
            latency_ms,
            corruption_rate_percent,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), HubError> {
        if self.requests_per_minute == 0 {
            return Err(HubError::InvalidModel(
                "requests per minute must be positive".to_string(),
            ));
        }
        if self.error_rate_percent > 100 {
            return Err(HubError::InvalidModel(format!(
                "error rate {}% is outside 0..=100",
                self.error_rate_percent
            )));
        }
        if self.corruption_rate_percent > 100 {
            return Err(HubError::InvalidModel(format!(
                "corruption rate {}% is outside 0..=100",
                self.corruption_rate_percent
            )));
        }
        Ok(())
    }

    /// Pause between cycles, not counting injected latency.
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / f64::from(self.requests_per_minute.max(1)))
    }

    pub fn injected_latency(&self) -> Option<Duration> {
        (self.latency_ms > 0).then(|| Duration::from_millis(self.latency_ms))
    }

    /// Decides the cycle outcome. The error draw is taken first; the corruption
    /// draw is a second, independent draw taken only when the error draw misses.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> CycleOutcome {
        if rng.random_range(1..=100u32) <= self.error_rate_percent {
            return CycleOutcome::SimulatedFailure;
        }

        if rng.random_range(1..=100u32) <= self.corruption_rate_percent {
            CycleOutcome::Corrupted
        } else {
            CycleOutcome::Normal
        }
    }
}

fn default_rpm() -> u32 {
    60
}
