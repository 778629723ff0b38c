use iris_core::{S3Settings, SqsSettings, VisionSettings};
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the analyzer service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Work queue configuration
    pub queue: SqsSettings,
    /// Vision provider configuration
    pub vision: VisionSettings,
    /// Worker loop configuration
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
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

/// What to do with a message whose artifact no longer exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingArtifactPolicy {
    /// Leave the message; the broker's max-receive poison policy will
    /// eventually remove it
    Redeliver,
    /// Acknowledge and drop immediately
    Acknowledge,
}

/// Worker loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// How long a claimed message stays hidden from other workers
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Sleep between polls when the queue is empty
    #[serde(default = "default_idle_delay_secs")]
    pub idle_delay_secs: u64,
    /// Policy for messages referencing a missing artifact
    #[serde(default = "default_missing_artifact")]
    pub missing_artifact: MissingArtifactPolicy,
}

// Default value functions
fn default_service_name() -> String {
    "iris-analyzer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_images_prefix() -> String {
    "images/".to_string()
}

fn default_metadata_prefix() -> String {
    "metadata/".to_string()
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_idle_delay_secs() -> u64 {
    2
}

fn default_missing_artifact() -> MissingArtifactPolicy {
    MissingArtifactPolicy::Redeliver
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/analyzer").required(false))
            .add_source(config::File::with_name("/etc/iris/analyzer").required(false))
            // ANALYZER__QUEUE__QUEUE_URL -> queue.queue_url
            .add_source(
                config::Environment::with_prefix("ANALYZER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get visibility timeout as Duration
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.visibility_timeout_secs)
    }

    /// Get idle delay as Duration
    pub fn idle_delay(&self) -> Duration {
        Duration::from_secs(self.worker.idle_delay_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            idle_delay_secs: default_idle_delay_secs(),
            missing_artifact: default_missing_artifact(),
        }
    }
}
