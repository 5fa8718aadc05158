mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use missive_api::{AppState, AppStateInner};
use missive_guard::{AdmissionPipeline, RateLimiter, rate_limit};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "missive=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = missive_db::Database::open(&config.db_path)?;

    // Admission control
    let limiter = RateLimiter::new(config.admission.max_writes, config.admission.window)?;
    let admission = AdmissionPipeline::standard(&config.admission, limiter.clone())?;
    info!(
        gates = ?admission.gate_names(),
        max_writes = config.admission.max_writes,
        window_secs = config.admission.window.as_secs(),
        "admission pipeline ready"
    );
    if config.admission.open_hours.is_none() {
        warn!("Opening hours are not enforced (MISSIVE_ENFORCE_HOURS=false)");
    }
    if config.trust_proxy {
        warn!("Trusting X-Forwarded-For for client identity; only safe behind a proxy that overwrites it");
    }
    tokio::spawn(rate_limit::run_prune_loop(limiter));

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret,
        admission,
        trust_proxy: config.trust_proxy,
        default_role: config.default_role,
    });

    let app = missive_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Missive server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Missive server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
