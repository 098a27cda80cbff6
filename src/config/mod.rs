//! Configuration module for the Truth or Dare backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Page size for task listings when the client gives no limit
    pub default_page_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("TOD_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env::var("TOD_DB_PATH")
            .unwrap_or_else(|_| "./data/truth_or_dare.sqlite".to_string())
            .into();

        let bind_addr = env::var("TOD_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid TOD_BIND_ADDR format: {}", e)))?;

        let log_level = env::var("TOD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let default_page_size = match env::var("TOD_DEFAULT_PAGE_SIZE") {
            Ok(raw) => raw.parse().map_err(|e| {
                AppError::Internal(format!("Invalid TOD_DEFAULT_PAGE_SIZE: {}", e))
            })?,
            Err(_) => 50,
        };

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            default_page_size,
        })
    }
}
