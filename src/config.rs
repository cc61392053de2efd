//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, then config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::AppError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
}

/// Which backend implementation to talk to
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process backend (local runs, tests)
    #[default]
    Memory,
    /// Appwrite REST API
    Appwrite,
}

/// Backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
    /// Appwrite project settings, required when `kind = "appwrite"`
    #[serde(default)]
    pub appwrite: AppwriteConfig,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Appwrite project settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppwriteConfig {
    /// API endpoint (e.g. https://cloud.appwrite.io/v1)
    pub endpoint: Option<String>,
    pub project_id: Option<String>,
    pub database_id: Option<String>,
    pub user_collection_id: Option<String>,
    pub post_collection_id: Option<String>,
    /// Storage bucket for post media
    pub storage_id: Option<String>,
}

/// Query cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Seconds a fetched entry is served without refetching (default: 60)
    pub stale_time_seconds: u64,
    /// Maximum entries per keyed store (default: 256)
    pub max_entries: usize,
    /// Feed page size (default: 9)
    pub page_size: usize,
    /// Number of posts in the recent-posts listing (default: 20)
    pub recent_posts_limit: usize,
}

impl CacheConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_secs(self.stale_time_seconds)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_seconds: 60,
            max_entries: 256,
            page_size: 9,
            recent_posts_limit: 20,
        }
    }
}

/// Media upload configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Largest accepted upload in bytes (default: 10 MiB)
    pub max_upload_bytes: usize,
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

fn default_allowed_content_types() -> Vec<String> {
    ["image/jpeg", "image/png", "image/gif", "image/webp", "image/svg+xml"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `config/` and the environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (SNAPGRAM__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, AppError> {
        Self::load_from_dir(Path::new("config"))
    }

    /// Same as [`AppConfig::load`] with a custom config directory
    pub fn load_from_dir(dir: &Path) -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("backend.kind", "memory")?
            .set_default("backend.timeout_seconds", 30)?
            .set_default("cache.stale_time_seconds", 60)?
            .set_default("cache.max_entries", 256)?
            .set_default("cache.page_size", 9)?
            .set_default("cache.recent_posts_limit", 20)?
            .set_default("media.max_upload_bytes", 10 * 1024 * 1024)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::from(dir.join("default")).required(false))
            .add_source(File::from(dir.join("local")).required(false))
            // Load from environment variables (SNAPGRAM__*)
            .add_source(
                Environment::with_prefix("SNAPGRAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Configuration for local runs and tests: in-memory backend, defaults
    pub fn in_memory() -> Self {
        Self {
            backend: BackendConfig {
                kind: BackendKind::Memory,
                timeout_seconds: 30,
                appwrite: AppwriteConfig::default(),
            },
            cache: CacheConfig::default(),
            media: MediaConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.cache.page_size == 0 {
            return Err(AppError::Config(
                "cache.page_size must be greater than 0".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(AppError::Config(
                "cache.max_entries must be greater than 0".to_string(),
            ));
        }
        if self.cache.recent_posts_limit == 0 {
            return Err(AppError::Config(
                "cache.recent_posts_limit must be greater than 0".to_string(),
            ));
        }
        if self.media.max_upload_bytes == 0 {
            return Err(AppError::Config(
                "media.max_upload_bytes must be greater than 0".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(AppError::Config(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        if self.backend.kind == BackendKind::Appwrite {
            let appwrite = &self.backend.appwrite;
            let endpoint = required("backend.appwrite.endpoint", &appwrite.endpoint)?;
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                AppError::Config(format!("backend.appwrite.endpoint is not a URL: {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::Config(
                    "backend.appwrite.endpoint must use http or https".to_string(),
                ));
            }
            required("backend.appwrite.project_id", &appwrite.project_id)?;
            required("backend.appwrite.database_id", &appwrite.database_id)?;
            required("backend.appwrite.user_collection_id", &appwrite.user_collection_id)?;
            required("backend.appwrite.post_collection_id", &appwrite.post_collection_id)?;
            required("backend.appwrite.storage_id", &appwrite.storage_id)?;
        }

        Ok(())
    }
}

/// Non-blank value of an optional setting
pub(crate) fn required<'a>(name: &str, value: &'a Option<String>) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::Config(format!(
                "{name} is required and must not be empty when backend.kind=appwrite"
            ))
        })
}
