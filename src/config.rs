//! Service configuration loaded from the environment.
//!
//! All knobs come from environment variables (plus `.env` in development).
//! Required credentials fail startup early with a clear message rather than
//! surfacing as upstream 401s later.

use std::path::PathBuf;

use thiserror::Error;

/// Default HTTP listen port.
const DEFAULT_PORT: u16 = 8080;

/// Default number of videos processed per channel ingest (beta cap).
const DEFAULT_CHANNEL_VIDEO_CAP: usize = 20;

/// Errors raised while reading the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

/// Deployment environment, gates stack-trace exposure in error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind address for the HTTP server.
    pub host: String,
    /// HTTP listen port.
    pub port: u16,
    /// CORS origins; empty list means permissive.
    pub allowed_origins: Vec<String>,
    /// Shared secret expected in the X-API-KEY header.
    pub backend_api_key: String,
    /// Credential for the embedding and LLM provider.
    pub openai_api_key: String,
    /// Credential for the video metadata provider.
    pub youtube_api_key: String,
    /// Credential for the email provider; None disables notifications.
    pub email_api_key: Option<String>,
    /// Database URL (sqlite).
    pub store_url: String,
    /// Root directory for the blob container.
    pub data_dir: PathBuf,
    /// Deployment environment.
    pub environment: Environment,
    /// Maximum videos ingested per channel run.
    pub channel_video_cap: usize,
}

impl Settings {
    /// Load settings from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("PORT") {
            Ok(v) => v.parse::<u16>().map_err(|_| ConfigError::InvalidVar {
                name: "PORT",
                value: v,
            })?,
            Err(_) => DEFAULT_PORT,
        };

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let environment = match std::env::var("APP_ENV").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        };

        let channel_video_cap = match std::env::var("CHANNEL_VIDEO_CAP") {
            Ok(v) => v.parse::<usize>().map_err(|_| ConfigError::InvalidVar {
                name: "CHANNEL_VIDEO_CAP",
                value: v,
            })?,
            Err(_) => DEFAULT_CHANNEL_VIDEO_CAP,
        };

        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port,
            allowed_origins,
            backend_api_key: require("BACKEND_API_KEY")?,
            openai_api_key: require("OPENAI_API_KEY")?,
            youtube_api_key: require("YOUTUBE_API_KEY")?,
            email_api_key: std::env::var("EMAIL_API_KEY").ok().filter(|s| !s.is_empty()),
            store_url: std::env::var("STORE_URL").unwrap_or_else(|_| "sqlite:tubesage.db".to_string()),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            environment,
            channel_video_cap,
        })
    }

    /// Whether the service runs in production mode.
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Directory of the transcript blob container.
    pub fn transcripts_dir(&self) -> PathBuf {
        self.data_dir.join("transcripts")
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingVar(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_required_var_is_reported() {
        let err = require("TUBESAGE_TEST_NOT_SET").unwrap_err();
        assert!(err.to_string().contains("TUBESAGE_TEST_NOT_SET"));
    }
}
