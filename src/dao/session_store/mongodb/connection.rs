use std::time::Duration;

use mongodb::{Client, Database, bson::doc};
use tokio::time::sleep;
use tracing::warn;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
};

/// Ceiling for the doubling retry delay between pings.
const RETRY_DELAY_CAP: Duration = Duration::from_secs(5);

/// Dial MongoDB and ping it until it answers, under the attempt and delay
/// budget carried by the [`MongoConfig`].
pub async fn establish_connection(config: &MongoConfig) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    let mut delay = config.retry_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok((client, database)),
            Err(err) if attempt >= config.connect_attempts => {
                return Err(MongoDaoError::InitialPing {
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts = config.connect_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "MongoDB ping failed; retrying"
                );
                sleep(delay).await;
                delay = (delay * 2).min(RETRY_DELAY_CAP);
            }
        }
    }
}
