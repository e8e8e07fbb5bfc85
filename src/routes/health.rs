use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::{dto::health::HealthResponse, services::health_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/healthcheck",
    responses((status = 200, description = "Current backend condition", body = HealthResponse))
)]
/// Liveness probe: always 200, with the store condition in the payload.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthResponse> {
    let status = health_service::health_status(&state).await;
    Json(status)
}

#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Service is ready to accept connections", body = HealthResponse),
        (status = 503, description = "Session store not yet available", body = HealthResponse)
    )
)]
/// Readiness probe: same payload as the liveness route, but degraded
/// backends answer 503 so load balancers hold traffic back.
pub async fn ready(State(state): State<SharedState>) -> impl IntoResponse {
    let health = health_service::health_status(&state).await;
    let code = if health.is_degraded() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(health))
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/healthcheck", get(healthcheck))
        .route("/ready", get(ready))
}
