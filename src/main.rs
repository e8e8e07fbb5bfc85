//! Quiz hub backend binary entrypoint wiring the WebSocket hub, the quiz
//! catalog client and the session store layers.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_hub_back::{
    config::{AppConfig, StoragePolicy},
    dao::{
        quiz_cache::MemoryQuizCache,
        quiz_catalog::HttpQuizCatalog,
        session_store::{
            SessionStore,
            memory::MemorySessionStore,
            mongodb::{MongoConfig, MongoDaoError, MongoSessionStore},
        },
    },
    routes,
    services::{hub_service, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env();

    let catalog =
        HttpQuizCatalog::new(&config.catalog_base_url).context("building catalog client")?;
    let app_state = AppState::new(Arc::new(MemoryQuizCache::new()), Arc::new(catalog));

    install_session_store(app_state.clone(), config.storage.clone()).await?;
    tokio::spawn(hub_service::run(app_state.clone()));

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Launch the storage supervisor responsible for maintaining the MongoDB
/// connection, or fall back to the in-memory store for local runs without a
/// configured database.
async fn install_session_store(state: SharedState, policy: StoragePolicy) -> anyhow::Result<()> {
    match MongoConfig::from_env().await {
        Ok(config) => {
            let config = Arc::new(config);
            tokio::spawn(storage_supervisor::run(state, policy, {
                move || {
                    let cfg = config.clone();
                    async move {
                        let store = MongoSessionStore::connect((*cfg).clone()).await?;
                        Ok::<Arc<dyn SessionStore>, _>(Arc::new(store))
                    }
                }
            }));
        }
        Err(MongoDaoError::MissingEnvVar { var }) => {
            warn!(var, "session store not configured; using in-memory sessions");
            state
                .set_session_store(Arc::new(MemorySessionStore::new()))
                .await;
        }
        Err(err) => return Err(err).context("loading MongoDB configuration"),
    }

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
