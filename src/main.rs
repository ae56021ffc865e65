//! blitz-back binary entrypoint wiring REST, WebSocket, timer, and storage
//! layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod dao;
mod dto;
mod error;
mod routes;
mod rules;
mod services;
mod state;

use dao::game_store::memory::MemoryGameStore;
use services::{storage_supervisor, timer};
use state::{AppState, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let (timers, expiries) = timer::TimerManager::new();
    let app_state = AppState::new(timers);

    // A single loop drains every armed clock deadline into the session
    // coordinator's timeout path.
    tokio::spawn(timer::run_expiry_loop(app_state.clone(), expiries));

    install_storage(app_state.clone()).await?;

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install the storage backend selected by `STORE_BACKEND`.
///
/// The in-memory backend is installed synchronously; MongoDB is handed to
/// the storage supervisor, which connects in the background and toggles
/// degraded mode as connectivity changes.
async fn install_storage(state: SharedState) -> anyhow::Result<()> {
    let backend = env::var("STORE_BACKEND").unwrap_or_else(|_| "mongo".into());

    match backend.as_str() {
        "memory" => {
            info!("using the in-memory game store; records die with the process");
            state.set_game_store(Arc::new(MemoryGameStore::new())).await;
            Ok(())
        }
        "mongo" => {
            #[cfg(feature = "mongo-store")]
            {
                let uri =
                    env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
                let db_name = env::var("MONGO_DB").ok();

                tokio::spawn(storage_supervisor::run(state, move || {
                    let uri = uri.clone();
                    let db_name = db_name.clone();
                    async move {
                        let config = dao::game_store::mongodb::MongoConfig::from_uri(
                            &uri,
                            db_name.as_deref(),
                        )
                        .await?;
                        let store =
                            dao::game_store::mongodb::MongoGameStore::connect(config).await?;
                        Ok(Arc::new(store) as Arc<dyn dao::game_store::GameStore>)
                    }
                }));
                Ok(())
            }
            #[cfg(not(feature = "mongo-store"))]
            {
                anyhow::bail!("this build does not include the `mongo-store` feature")
            }
        }
        other => anyhow::bail!("unknown STORE_BACKEND `{other}` (expected `memory` or `mongo`)"),
    }
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
