/// Database model definitions.
pub mod models;
/// Ephemeral quiz cache port and backends.
pub mod quiz_cache;
/// Quiz catalog client port and HTTP backend.
pub mod quiz_catalog;
/// Session persistence port and backends.
pub mod session_store;
/// Storage abstraction layer shared by database backends.
pub mod storage;
