//! Environment-driven runtime configuration.

use std::{env, time::Duration};

/// Deadline applied to every cache, session-store and catalog call.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// Base URL of the quiz catalog service.
    pub catalog_base_url: String,
    /// Session store supervision tunables.
    pub storage: StoragePolicy,
}

impl AppConfig {
    /// Load the configuration from environment variables, falling back to
    /// local-development defaults.
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .or_else(|_| env::var("SERVER_PORT"))
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8080);

        let catalog_base_url = env::var("CATALOG_BASE_URL")
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "http://localhost:8081".to_owned());

        Self {
            port,
            catalog_base_url,
            storage: StoragePolicy::from_env(),
        }
    }
}

#[derive(Debug, Clone)]
/// How aggressively the session store connection is watched and repaired.
/// Deployments with flaky database links can stretch the poll cadence or
/// grant more reconnect attempts without a rebuild.
pub struct StoragePolicy {
    /// Pause between health probes while the store looks healthy.
    pub health_poll: Duration,
    /// Reconnect attempts per outage before giving up on the handle.
    pub reconnect_attempts: u32,
    /// First retry delay; doubles per failure up to the ceiling.
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
}

impl StoragePolicy {
    pub fn from_env() -> Self {
        let health_poll = env_secs("STORAGE_HEALTH_POLL_SECS", 5);
        let reconnect_attempts = env::var("STORAGE_RECONNECT_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse().ok())
            .filter(|value| *value > 0)
            .unwrap_or(3);

        Self {
            health_poll,
            reconnect_attempts,
            backoff_floor: Duration::from_secs(1),
            backoff_ceiling: Duration::from_secs(10),
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        self.backoff_floor
    }

    pub fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.backoff_ceiling)
    }
}

fn env_secs(var: &str, default_secs: u64) -> Duration {
    env::var(var)
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default_secs))
}
