use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// External collaborators a process may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Database,
    MessageBroker,
    DedupCache,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::Database => "database",
            Dependency::MessageBroker => "message_broker",
            Dependency::DedupCache => "dedup_cache",
        }
    }

    /// Losing a critical dependency makes the process unhealthy, anything else degrades it.
    pub fn is_critical(&self) -> bool {
        !matches!(self, Dependency::DedupCache)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: HashMap<String, ServiceHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            error: Some(error),
        }
    }

    pub fn not_configured() -> Self {
        Self {
            status: HealthStatus::Degraded,
            response_time_ms: None,
            error: Some("Not configured".to_string()),
        }
    }
}

pub fn overall_status(checks: &HashMap<Dependency, ServiceHealth>) -> HealthStatus {
    let critical_unhealthy = checks
        .iter()
        .filter(|(dependency, _)| dependency.is_critical())
        .any(|(_, health)| health.status == HealthStatus::Unhealthy);

    let has_problem = checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy);

    if critical_unhealthy {
        HealthStatus::Unhealthy
    } else if has_problem {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
