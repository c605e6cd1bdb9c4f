//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use opsession::config::Config;
use opsession::generate::ScriptedGenerator;
use opsession::server::{self, AppState};
use opsession::session::{SessionRegistry, TurnRunner};
use opsession::store::{SessionStore, SqliteSessionStore};
use opsession::ws::ConnectionHub;

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
    database_override: Option<PathBuf>,
) -> Result<()> {
    let mut config = Config::load(config_path).await?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(path) = database_override {
        config.database.path = path.to_string_lossy().to_string();
    }

    // Open the database and run migrations
    let store: Arc<dyn SessionStore> = Arc::new(
        SqliteSessionStore::new(&config.database.path)
            .await
            .with_context(|| format!("failed to open database at {}", config.database.path))?,
    );
    info!(path = %config.database.path, "Database ready");

    let response_delay = Duration::from_millis(config.agent.response_delay_ms);
    let registry = SessionRegistry::new(store, config.agent);
    let turns = TurnRunner::new(Arc::new(ScriptedGenerator::new(response_delay)));
    let hub = ConnectionHub::new();

    let state = AppState {
        registry: registry.clone(),
        hub,
        turns,
    };

    let app = server::build_app(state, &config.server);

    let ip: IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("invalid bind host {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain session actors before exiting
    registry.shutdown().await;

    info!("Server stopped");
    Ok(())
}

/// Completes on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
