//! Keeps a session store attached to the shared state, flipping the
//! degraded flag whenever the database link drops and repairing it under
//! the configured [`StoragePolicy`].

use std::{future::Future, sync::Arc};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    config::StoragePolicy,
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

/// Outcome of one supervision round over a connected store.
enum Watch {
    /// Reconnect attempts were exhausted; the handle is considered dead and
    /// a fresh connection must be established.
    HandleLost,
}

/// Connect, watch, repair, repeat. Never returns; each lost handle is
/// replaced by dialing the backend from scratch.
pub async fn run<F, Fut>(state: SharedState, policy: StoragePolicy, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut dial_backoff = policy.initial_backoff();

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "session store connection attempt failed");
                sleep(dial_backoff).await;
                dial_backoff = policy.next_backoff(dial_backoff);
                continue;
            }
        };

        state.set_session_store(store.clone()).await;
        info!("session store connected; leaving degraded mode");
        dial_backoff = policy.initial_backoff();

        let Watch::HandleLost = watch(&state, &policy, store.as_ref()).await;
        warn!("session store handle lost; dialing a new connection");
    }
}

/// Poll the store until an outage outlives the reconnect budget.
async fn watch(state: &SharedState, policy: &StoragePolicy, store: &dyn SessionStore) -> Watch {
    loop {
        sleep(policy.health_poll).await;

        if store.health_check().await.is_ok() {
            if state.is_degraded().await {
                info!("session store healthy again; leaving degraded mode");
                state.update_degraded(false).await;
            }
            continue;
        }

        // The hub keeps serving from caches while we repair the link.
        state.update_degraded(true).await;
        if repair(policy, store).await {
            state.update_degraded(false).await;
        } else {
            return Watch::HandleLost;
        }
    }
}

/// Drive `try_reconnect` under the policy's attempt and backoff budget.
async fn repair(policy: &StoragePolicy, store: &dyn SessionStore) -> bool {
    let mut backoff = policy.initial_backoff();

    for attempt in 1..=policy.reconnect_attempts {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "session store reconnected");
                return true;
            }
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts = policy.reconnect_attempts,
                    error = %err,
                    "session store reconnect attempt failed"
                );
                sleep(backoff).await;
                backoff = policy.next_backoff(backoff);
            }
        }
    }

    false
}
