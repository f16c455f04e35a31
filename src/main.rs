use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use translation_service::{
    cache::TtlCache,
    config::Config,
    db::Database,
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored when the variables come from the environment)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("translation_service=info".parse()?),
        )
        .init();

    info!("Starting translation service");

    // Load configuration from environment
    let config = Config::from_env()?;

    let db = Database::connect(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to open database")?;
    info!("Database ready at {}", config.database_url);

    let cache = Arc::new(TtlCache::new(config.export_cache_ttl));
    info!(ttl_secs = config.export_cache_ttl.as_secs(), "Export cache enabled");

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    server::serve(listener, AppState::new(db, cache, config)).await
}
