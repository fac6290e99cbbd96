use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use tracing::{info, warn};

use llmio_balance::{BreakerConfig, BreakerRegistry};
use llmio_core::{AuthService, Dispatcher};
use llmio_router::{AppState, admin_router, llm_router};
use llmio_storage::{LogSink, SeaOrmStorage, Storage};

mod config;

/// How long in-flight requests may drain after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = config::Cli::parse();
    let gateway = config::load(&args)?;
    config::ensure_db_parent(&gateway.db_path)?;

    let dsn = format!("sqlite://{}?mode=rwc", gateway.db_path);
    let storage = Arc::new(
        SeaOrmStorage::connect(&dsn)
            .await
            .context("connect storage")?,
    );
    storage.sync().await.context("schema sync")?;
    storage.migrate().await.context("data migration")?;
    let storage: Arc<dyn Storage> = storage;

    let sink = LogSink::spawn(storage.clone());
    let auth = Arc::new(AuthService::new(
        storage.clone(),
        gateway.admin_token.clone(),
    ));
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
    let dispatcher = Arc::new(Dispatcher::new(storage.clone(), sink, breakers));
    let state = AppState::new(dispatcher, auth, storage);

    let app = Router::new()
        .merge(llm_router(state.clone()))
        .nest("/api", admin_router(state));

    let bind = format!("{}:{}", gateway.host, gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(event = "listening", addr = %bind, db = %gateway.db_path);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    info!(event = "shutdown_complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!(event = "shutdown_started", grace_secs = SHUTDOWN_GRACE.as_secs());

    // Bound the drain: anything still in flight after the grace window is
    // cut off with the process.
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        warn!(event = "shutdown_grace_exceeded");
        std::process::exit(1);
    });
}
