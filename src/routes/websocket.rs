use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::quiz_catalog::CatalogError,
    error::AppError,
    services::websocket_service,
    state::SharedState,
};

/// Header carrying the caller identity, validated by the upstream gateway.
const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    instance_id: Option<Uuid>,
    access_code: Option<String>,
}

#[utoipa::path(
    get,
    path = "/ws",
    params(
        ("instance_id" = Option<Uuid>, Query, description = "Target quiz instance"),
        ("access_code" = Option<String>, Query, description = "Access code resolving to an instance"),
    ),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 400, description = "Exactly one of instance_id and access_code is required"),
        (status = 401, description = "Missing or invalid identity header"),
        (status = 403, description = "Access denied to this quiz"),
        (status = 404, description = "Quiz instance not found"),
    )
)]
/// Resolve the caller's target instance and upgrade the connection into a
/// quiz WebSocket session.
pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or_else(|| AppError::Unauthorized("missing or invalid user identity".to_owned()))?;

    let bundle = match (query.instance_id, query.access_code) {
        (None, None) => {
            return Err(AppError::BadRequest(
                "missing instance_id or access_code".to_owned(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(AppError::BadRequest(
                "provide exactly one of instance_id and access_code".to_owned(),
            ));
        }
        (Some(instance_id), None) => state
            .catalog()
            .get_instance(instance_id, user_id)
            .await
            .map_err(map_catalog_error)?,
        (None, Some(access_code)) => state
            .catalog()
            .get_instance_by_access_code(access_code, user_id)
            .await
            .map_err(map_catalog_error)?,
    };

    let instance_id = bundle.instance.id;
    let is_creator = bundle.instance.creator_id == user_id;

    Ok(ws
        .max_message_size(websocket_service::MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            websocket_service::handle_socket(state, socket, user_id, instance_id, is_creator)
        }))
}

fn map_catalog_error(err: CatalogError) -> AppError {
    match err {
        CatalogError::NotFound { .. } => AppError::NotFound("Quiz instance not found".to_owned()),
        CatalogError::Forbidden { .. } => {
            AppError::Forbidden("Access denied to this quiz".to_owned())
        }
        other => {
            warn!(error = %other, "catalog lookup failed");
            AppError::ServiceUnavailable("Failed to resolve quiz instance".to_owned())
        }
    }
}

/// Configure the WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
