use time::OffsetDateTime;

/// Health check data structures.
pub mod health;
/// Quiz instance, question and leaderboard data structures.
pub mod quiz;
/// WebSocket message data structures.
pub mod ws;

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    unix_millis(OffsetDateTime::now_utc())
}

/// Convert an [`OffsetDateTime`] to milliseconds since the Unix epoch.
pub fn unix_millis(time: OffsetDateTime) -> i64 {
    (time.unix_timestamp_nanos() / 1_000_000) as i64
}
