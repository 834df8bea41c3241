//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml, optional)
//! - Environment variables (with APP_ prefix)
//! - Built-in defaults
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_LIMITS_MAX_CONCURRENT_JOBS, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! `HOST` and `PORT` are honored without the prefix because deployment
//! platforms commonly inject them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub limits: LimitsConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Defaults applied when a processing request omits a field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Whisper model used when the request does not name one
    pub default_model: String,
    /// Subtitle chunking mode used when the request does not name one
    pub default_mode: String,
}

/// Bounds on resource usage.
///
/// ## Fields:
/// - `max_upload_bytes`: uploads larger than this are rejected while the
///   multipart stream is drained (reference limit: 100 MiB)
/// - `max_concurrent_jobs`: number of worker tasks allowed to transcribe
///   at the same time; additional jobs queue in `pending`
/// - `job_retention_secs`: how long a terminal job stays queryable before
///   the sweeper removes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_upload_bytes: u64,
    pub max_concurrent_jobs: usize,
    pub job_retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub output_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                default_model: "medium".to_string(),
                default_mode: "oneword".to_string(),
            },
            limits: LimitsConfig {
                max_upload_bytes: 100 * 1024 * 1024,
                max_concurrent_jobs: 2,
                job_retention_secs: 3600,
            },
            storage: StorageConfig {
                upload_dir: "uploads".to_string(),
                output_dir: "outputs".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Checks ports, limits, and that the configured default model and
    /// mode are recognized vocabulary, so a bad deployment fails at
    /// startup instead of on the first processing request.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.limits.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }

        if self.limits.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.limits.job_retention_secs == 0 {
            return Err(anyhow::anyhow!("Job retention must be greater than 0"));
        }

        self.models
            .default_model
            .parse::<crate::pipeline::ModelKind>()
            .map_err(|e| anyhow::anyhow!("Invalid default model: {}", e))?;

        self.models
            .default_mode
            .parse::<crate::subtitle::SubtitleMode>()
            .map_err(|e| anyhow::anyhow!("Invalid default mode: {}", e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.max_upload_bytes, 100 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.limits.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_default_model_rejected() {
        let mut config = AppConfig::default();
        config.models.default_model = "gigantic".to_string();
        assert!(config.validate().is_err());
    }
}
