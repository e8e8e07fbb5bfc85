use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the quiz hub backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::health::ready,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::ws::InboundFrame,
            crate::dto::ws::AnswerPayload,
            crate::dto::ws::ServerMessage,
            crate::dto::ws::ConnectedPayload,
            crate::dto::ws::ParticipantsUpdatePayload,
            crate::dto::ws::QuizStartedPayload,
            crate::dto::ws::QuestionPayload,
            crate::dto::ws::QuestionView,
            crate::dto::ws::AnswerResultPayload,
            crate::dto::ws::LeaderboardPayload,
            crate::dto::ws::TimeExpiredPayload,
            crate::dto::ws::WaitingForCreatorPayload,
            crate::dto::ws::QuizFinishedPayload,
            crate::dto::ws::ErrorPayload,
            crate::dto::quiz::LeaderboardEntry,
            crate::dto::quiz::QuizType,
            crate::dto::quiz::InstanceStatus,
            crate::dto::quiz::QuestionKind,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "game", description = "WebSocket operations for quiz clients"),
    )
)]
pub struct ApiDoc;
