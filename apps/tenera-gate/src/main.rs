mod config;
mod handlers;
mod storage;
mod webhook;

use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::handlers::{build_router, AppState};
use crate::storage::RedisOrderStore;

#[tokio::main]
async fn main() {
    // Default to WARN level if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    info!("Starting Tenera gate on port {}", config.port);
    info!("Redis URL: {}", config.redis_url);
    info!(
        "Order TTL: {}s, snapshot TTL: {}s",
        config.order_ttl_seconds, config.snapshot_ttl_seconds
    );
    if config.webhook_secret.is_none() {
        warn!("TENERA_WEBHOOK_SECRET is not set; payment webhooks will be refused");
    }

    let store = match RedisOrderStore::new(
        &config.redis_url,
        config.order_ttl_seconds,
        config.snapshot_ttl_seconds,
    )
    .await
    {
        Ok(store) => store,
        Err(err) => {
            error!("Failed to connect to Redis: {}", err);
            std::process::exit(1);
        }
    };

    let state = AppState {
        store: Arc::new(store),
        config: Arc::new(config.clone()),
    };

    let app = build_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("Tenera gate listening on {}", addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
