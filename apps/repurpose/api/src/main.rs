use core_config::tracing::{init_tracing, install_color_eyre};
use domain_connections::{ConnectionService, CookieSettings, PgConnectionRepository};
use sea_orm::Database;
use std::time::Duration;
use tracing::info;

mod config;
mod server;
mod session;

use config::Config;
use session::SessionVerifier;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Colored error reports before anything fallible runs
    install_color_eyre();

    let config = Config::from_env()?;
    init_tracing(&config.environment);

    let db = Database::connect(config.database.connect_options())
        .await
        .map_err(|e| eyre::eyre!("PostgreSQL connection failed: {}", e))?;
    info!("Connected to PostgreSQL");

    let service = ConnectionService::from_config(
        &config.connections,
        PgConnectionRepository::new(db.clone()),
    )
    .map_err(|e| eyre::eyre!("Failed to build connection service: {}", e))?;

    info!(providers = ?service.registry().ids(), "OAuth providers registered");

    let app = server::app(
        service,
        CookieSettings::new(server::AUTH_PREFIX, config.environment.secure_cookies()),
        SessionVerifier::new(&config.session.jwt_secret),
        config.server.request_timeout,
    );

    server::serve(app, &config.server, Duration::from_secs(30), async move {
        info!("Shutting down: closing database connections");
        match db.close().await {
            Ok(_) => info!("PostgreSQL connection closed successfully"),
            Err(e) => tracing::error!("Error closing PostgreSQL: {}", e),
        }
    })
    .await
    .map_err(|e| eyre::eyre!("Server error: {}", e))?;

    info!("Repurpose API shutdown complete");
    Ok(())
}
