use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use marketplace_api::api::{self, AppState};
use marketplace_api::auth::JwtService;
use marketplace_api::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let config = Config::parse();

    // Run migrations first
    info!("Running database migrations...");
    let database_url = config.database_url.clone();
    tokio::task::spawn_blocking(move || marketplace_api::run_migrations(&database_url)).await??;
    info!("Migrations completed successfully");

    let pool = marketplace_api::build_pool(&config.database_url, config.pool_size).await?;

    let app_state = AppState {
        pool,
        jwt: Arc::new(JwtService::new(&config.jwt_secret, config.jwt_ttl_minutes)),
        bootstrap_admin_email: config.bootstrap_admin_email.clone(),
    };

    let app = api::create_router(app_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    info!("Marketplace API started on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
