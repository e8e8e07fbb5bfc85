use std::time::Duration;

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_RETRY_DELAY_MS: u64 = 250;

#[derive(Clone)]
pub struct MongoConfig {
    pub options: ClientOptions,
    pub database_name: String,
    /// Ping attempts before a dial is declared failed.
    pub connect_attempts: u32,
    /// First retry delay; doubles per failed ping.
    pub retry_delay: Duration,
}

impl MongoConfig {
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let database_name = db_name.unwrap_or("quiz_hub").to_owned();
        let options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;

        Ok(Self {
            options,
            database_name,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        })
    }

    pub async fn from_env() -> MongoResult<Self> {
        let uri = std::env::var("MONGO_URI")
            .map_err(|_| MongoDaoError::MissingEnvVar { var: "MONGO_URI" })?;
        let db = std::env::var("MONGO_DB").ok();

        let mut config = Self::from_uri(&uri, db.as_deref()).await?;

        if let Some(attempts) = parse_env("MONGO_CONNECT_ATTEMPTS") {
            config.connect_attempts = attempts;
        }
        if let Some(delay_ms) = parse_env("MONGO_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(delay_ms);
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr + PartialOrd + From<u8>>(var: &str) -> Option<T> {
    std::env::var(var)
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|value| *value > T::from(0))
}
