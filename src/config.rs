use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // HTTP server
    pub port: u16,

    // Bearer token required by the management endpoints
    pub api_token: String,

    // Export cache
    pub export_cache_ttl: Duration,
}

/// Database settings alone, for tools that never serve HTTP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://translations.db".to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database = DatabaseConfig::from_env();

        Ok(Self {
            // Database
            database_url: database.url,
            database_max_connections: database.max_connections,

            // HTTP server
            port: match std::env::var("PORT") {
                Ok(val) => val.parse().context("Failed to parse PORT")?,
                Err(_) => 8080,
            },

            // Auth
            api_token: std::env::var("API_TOKEN").context("API_TOKEN not set")?,

            // Export cache (seconds)
            export_cache_ttl: Duration::from_secs(
                std::env::var("EXPORT_CACHE_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
        })
    }
}
