//! Quiz Arena Back binary entrypoint wiring REST, SSE and the room store backends.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, bail};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_arena_back::{
    config::AppConfig,
    dao::{
        room_store::{RoomStore, memory::MemoryRoomStore},
        storage::StorageError,
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".into());
    let app_state = start_store(&backend, config)?;

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, backend = %backend, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Create the shared state for `backend`. Remote stores are connected in the
/// background by the storage supervisor; the server runs degraded until then.
fn start_store(backend: &str, config: AppConfig) -> anyhow::Result<SharedState> {
    let state = match backend {
        "memory" => AppState::with_store(config, Arc::new(MemoryRoomStore::new())),
        "memory-poll" => {
            let every = config.poll_interval;
            AppState::with_store(config, Arc::new(MemoryRoomStore::polling(every)))
        }
        #[cfg(feature = "couch-store")]
        "couch" => {
            use quiz_arena_back::dao::room_store::couchdb::{CouchConfig, CouchRoomStore};

            let state = AppState::new(config);
            tokio::spawn(storage_supervisor::run(state.clone(), || async {
                let config = CouchConfig::from_env()?;
                let store = CouchRoomStore::connect(config).await?;
                Ok::<Arc<dyn RoomStore>, StorageError>(Arc::new(store))
            }));
            state
        }
        #[cfg(feature = "mongo-store")]
        "mongo" => {
            use quiz_arena_back::dao::room_store::mongodb::{MongoConfig, MongoRoomStore};

            let poll_interval = config.poll_interval;
            let state = AppState::new(config);
            tokio::spawn(storage_supervisor::run(state.clone(), move || async move {
                let config = MongoConfig::from_env(poll_interval).await?;
                let store = MongoRoomStore::connect(config).await?;
                Ok::<Arc<dyn RoomStore>, StorageError>(Arc::new(store))
            }));
            state
        }
        other => bail!("unsupported STORE_BACKEND `{other}`"),
    };
    Ok(state)
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

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
