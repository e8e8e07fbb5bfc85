use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the session store and report the backend's current condition.
/// The same payload feeds the liveness and readiness routes.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let Ok(store) = state.require_session_store().await else {
        return HealthResponse::degraded("session store unavailable");
    };

    if let Err(err) = store.health_check().await {
        warn!(error = %err, "session store health check failed");
        return HealthResponse::degraded("session store ping failed");
    }

    if state.is_degraded().await {
        return HealthResponse::degraded("session store reconnecting");
    }

    HealthResponse::ok()
}
