//! # Taskflow Sync Server
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  config ──► SQLite pool + migrations                                    │
//! │         ──► NotificationDispatcher   (background, drains on shutdown)   │
//! │         ──► UndoSweeper              (background, hourly)               │
//! │         ──► axum on bind_addr        (until Ctrl+C / SIGTERM)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use taskflow_db::{Database, DbConfig};
use taskflow_server::auth::JwtManager;
use taskflow_server::rate_limit::RateLimiter;
use taskflow_server::{app_router, AppState, ServerConfig};
use taskflow_sync::{ChannelNotifier, Clock, NotificationDispatcher, SystemClock, UndoSweeper};

const DEFAULT_LOG_FILTER: &str = "taskflow_server=info,taskflow_sync=info,taskflow_db=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_target(true)
        .init();

    info!("Starting Taskflow sync server...");

    let config = ServerConfig::load()?;
    info!(?config, "Configuration loaded");

    let db = Database::new(
        DbConfig::new(&config.database.path)
            .max_connections(config.database.max_connections)
            .busy_timeout(config.database.busy_timeout()),
    )
    .await?;
    info!(path = %config.database.path.display(), "Database ready");

    let settings = Arc::new(config.sync.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (notifier, notifications) = ChannelNotifier::channel(settings.notification_queue);
    let (dispatcher, dispatcher_handle) =
        NotificationDispatcher::new(notifications, db.notifications(), clock.clone());
    let dispatcher_task = tokio::spawn(dispatcher.run());

    let rate_limiter = Arc::new(RateLimiter::from_settings(&config.rate_limit));
    let state = AppState::new(
        db.clone(),
        settings.clone(),
        clock,
        Arc::new(notifier),
        Arc::new(JwtManager::new(
            &config.auth.jwt_secret,
            config.auth.access_token_lifetime_secs,
        )),
        rate_limiter.clone(),
    );

    let (sweeper, sweeper_handle) = UndoSweeper::new(state.undo_service(), settings.sweep_interval());
    let sweeper_task = tokio::spawn(sweeper.run());

    let prune_task = tokio::spawn(prune_rate_windows(rate_limiter, config.rate_limit.window()));

    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "Sync server listening");

    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    prune_task.abort();
    if let Err(e) = sweeper_handle.shutdown().await {
        warn!(error = %e, "Undo sweeper already stopped");
    }
    if let Err(e) = dispatcher_handle.shutdown().await {
        warn!(error = %e, "Notification dispatcher already stopped");
    }
    let (sweeper_result, dispatcher_result) = tokio::join!(sweeper_task, dispatcher_task);
    for result in [sweeper_result, dispatcher_result] {
        if let Err(e) = result {
            error!(error = %e, "Background task panicked");
        }
    }

    db.close().await;
    info!("Sync server stopped");
    Ok(())
}

async fn prune_rate_windows(limiter: Arc<RateLimiter>, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let pruned = limiter.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned rate limit windows");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections...");
}
