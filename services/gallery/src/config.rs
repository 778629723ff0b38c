use iris_core::{S3Settings, SqsSettings};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gallery service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Work queue configuration
    pub queue: SqsSettings,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Object storage configuration: one bucket, two key namespaces
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// S3 connection settings
    #[serde(flatten)]
    pub s3: S3Settings,
    /// Key prefix for uploaded images
    #[serde(default = "default_images_prefix")]
    pub images_prefix: String,
    /// Key prefix for metadata documents
    #[serde(default = "default_metadata_prefix")]
    pub metadata_prefix: String,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Display URL expiration in seconds
    #[serde(default = "default_url_expiry_secs")]
    pub url_expiry_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "iris-gallery".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_images_prefix() -> String {
    "images/".to_string()
}

fn default_metadata_prefix() -> String {
    "metadata/".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_url_expiry_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/gallery").required(false))
            .add_source(config::File::with_name("/etc/iris/gallery").required(false))
            // GALLERY__STORAGE__BUCKET -> storage.bucket
            .add_source(
                config::Environment::with_prefix("GALLERY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get display URL expiry as Duration
    pub fn url_expiry(&self) -> Duration {
        Duration::from_secs(self.api.url_expiry_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            url_expiry_secs: default_url_expiry_secs(),
        }
    }
}
