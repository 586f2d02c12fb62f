/// Configuration management for the content graph
///
/// Loads configuration from environment variables (and a `.env` file when
/// one is present).
use anyhow::{Context, Result};
use db_pool::env_utils::parse_env_with_default;
use db_pool::DbConfig;
use serde::{Deserialize, Serialize};

/// Service name used for pool metrics labels
pub const SERVICE_NAME: &str = "content-graph";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Listing limits
    pub pagination: PaginationConfig,
}

/// Database configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,
    /// Max connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Min connections in pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .finish()
    }
}

/// Page-size limits applied to every listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_page_size() -> i64 {
    10
}

fn default_max_page_size() -> i64 {
    50
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl PaginationConfig {
    /// Read `CONTENT_DEFAULT_PAGE_SIZE` / `CONTENT_MAX_PAGE_SIZE`.
    ///
    /// Non-positive values fall back to the defaults and the default page
    /// size never exceeds the maximum.
    pub fn from_env() -> Self {
        let max_page_size = match parse_env_with_default("CONTENT_MAX_PAGE_SIZE", 0i64) {
            n if n > 0 => n,
            _ => default_max_page_size(),
        };
        let default_page_size = match parse_env_with_default("CONTENT_DEFAULT_PAGE_SIZE", 0i64) {
            n if n > 0 => n,
            _ => default_page_size(),
        };

        Self {
            default_page_size: default_page_size.min(max_page_size),
            max_page_size,
        }
    }
}

impl DatabaseConfig {
    /// Pool settings for `db_pool::create_pool`
    pub fn to_db_config(&self) -> DbConfig {
        let mut config = DbConfig::with_url(SERVICE_NAME, self.url.clone());
        config.max_connections = self.max_connections;
        config.min_connections = self.min_connections.min(self.max_connections);
        config
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL environment variable not set")?,
            max_connections: parse_env_with_default(
                "DB_MAX_CONNECTIONS",
                default_max_connections(),
            ),
            min_connections: parse_env_with_default(
                "DB_MIN_CONNECTIONS",
                default_min_connections(),
            ),
        };

        Ok(Config {
            database,
            pagination: PaginationConfig::from_env(),
        })
    }
}
