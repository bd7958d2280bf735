//! PolicyKit API - Community Governance Platform
//!
//! Receives platform events, proposes them under community policies, runs
//! votes through the Metagov governance broker and executes passed actions
//! back on the platform.
//!
//! Postgres is optional: without DATABASE_URL every store stays in memory.

mod action;
mod auth;
mod community;
mod config;
mod db;
mod error;
mod governance;
mod integrations;
mod metagov;
mod models;
mod policy;
mod proposal;
mod routes;
mod state;
mod tasks;

use crate::config::Settings;
use crate::db::{Persistence, WriteThrough};
use crate::governance::{Dispatcher, Governance};
use crate::integrations::AdapterRegistry;
use crate::metagov::{DisabledBroker, GovernanceBroker, MetagovClient};
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting PolicyKit - Community Governance Platform...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    // Optional persistence
    let persistence = match &settings.database {
        Some(config) => {
            let db = Persistence::connect(config).await?;
            db.ensure_schema().await?;
            info!("✅ Database connected ({}:{}/{})", config.host, config.port, config.database);
            Some(db)
        }
        None => {
            warn!("⚠️  DATABASE_URL not set, running with in-memory stores only");
            None
        }
    };

    let broker: Arc<dyn GovernanceBroker> = if settings.metagov.enabled {
        info!("🔗 Using Metagov at {}", settings.metagov.url);
        Arc::new(MetagovClient::new(
            settings.metagov.url.clone(),
            Duration::from_secs(settings.dispatch.timeout_secs),
        )?)
    } else {
        warn!("⚠️  Metagov disabled, votes and broker plugins are unavailable");
        Arc::new(DisabledBroker)
    };

    let adapters = AdapterRegistry::with_defaults();
    info!("🧩 Platforms: {:?}", adapters.platforms());

    let governance = Governance::new(
        adapters,
        broker,
        Dispatcher::new(settings.dispatch.clone())?,
        WriteThrough::new(persistence.clone()),
        settings.server.public_url.clone(),
    );
    if let Some(db) = &persistence {
        governance.restore(db.load_snapshot().await?).await;
    }

    let _tasks = tasks::spawn(governance.clone(), &settings.tasks);

    let state = Arc::new(AppState::new(settings.clone(), governance));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Platform Ingress ───");
    info!("   GET  /{{platform}}/authorize                  - Issue OAuth state");
    info!("   POST /{{platform}}/oauth                      - Complete install");
    info!("   POST /{{platform}}/action                     - Platform webhook");
    info!("   POST /metagov/internal/outcome/{{id}}         - Broker process callback");
    info!("   POST /metagov/internal/action                - Broker-forwarded event");
    info!("");
    info!("   ─── Governance API ───");
    info!("   POST /api/auth/login                         - Platform login");
    info!("   GET  /api/policies                           - List policies");
    info!("   POST /api/actions                            - Propose an action");
    info!("   POST /api/proposals/{{id}}/vote               - Start a vote");
    info!("   POST /api/proposals/{{id}}/execute            - Execute (Admin only)");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,policykit_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
