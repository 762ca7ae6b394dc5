use crate::error::AppError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub push: PushConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// VAPID service credentials for web push.
///
/// The private key is the raw 32-byte P-256 scalar, base64url-encoded (the
/// format `VapidSignatureBuilder::from_base64` expects). When the private key
/// is absent, push delivery is disabled and reported as a configuration
/// error; broadcast to open connections is unaffected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub vapid_private_key: Option<String>,
    pub vapid_public_key: Option<String>,
    /// Contact identity for the VAPID `sub` claim
    pub vapid_subject: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                port: std::env::var("APP_PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .map_err(|_| AppError::Config("APP_PORT must be a valid port".to_string()))?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .map_err(|_| AppError::Config("DATABASE_URL is required".to_string()))?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .map_err(|_| {
                        AppError::Config("DATABASE_MAX_CONNECTIONS must be a number".to_string())
                    })?,
            },
            push: PushConfig {
                vapid_private_key: std::env::var("VAPID_PRIVATE_KEY").ok(),
                vapid_public_key: std::env::var("VAPID_PUBLIC_KEY").ok(),
                vapid_subject: std::env::var("VAPID_SUBJECT")
                    .unwrap_or_else(|_| "mailto:soporte@vecindo.app".to_string()),
            },
        })
    }
}
