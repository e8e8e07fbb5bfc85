use serde::Serialize;
use utoipa::ToSchema;

/// Condition reported by the liveness and readiness probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Probe payload shared by `/healthcheck` and `/ready`: the overall
/// condition plus, when degraded, what is actually wrong.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: HealthStatus::Ok,
            detail: None,
        }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            detail: Some(detail.into()),
        }
    }

    /// Whether the readiness probe should fail for this payload.
    pub fn is_degraded(&self) -> bool {
        self.status == HealthStatus::Degraded
    }
}
