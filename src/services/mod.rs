/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Hub dispatch loop and connection membership lifecycle.
pub mod hub_service;
/// Join and resume flows for freshly registered clients.
pub mod join_service;
/// Question progression engine.
pub mod progression_service;
/// Scoring rules and leaderboard projection.
pub mod scoring;
/// Storage persistence supervisor.
pub mod storage_supervisor;
#[cfg(test)]
pub(crate) mod test_support;
/// WebSocket connection and message handling service.
pub mod websocket_service;
