/*!
 * Configuration types for s3stream clients
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::retry::{BackoffStrategy, RetryPolicy};
use crate::error::{S3Error, S3Result};

const MIB: u64 = 1024 * 1024;

/// Minimum part size accepted by S3 (5 MiB)
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Maximum part size accepted by S3 (5 GiB)
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;

/// Maximum number of parts in one multipart upload
pub const MAX_PARTS: u32 = 10_000;

/// Maximum object size reachable through multipart upload (5 TiB)
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * MIB;

/// Default part size and the granularity derived part sizes are rounded to (16 MiB)
pub const DEFAULT_PART_SIZE: u64 = 16 * MIB;

/// Default number of parallel part uploads
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Maximum number of parallel part uploads
pub const MAX_CONCURRENCY: usize = 64;

/// Limits imposed by the target server
///
/// Compatible servers may differ from AWS, so every ceiling is configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolLimits {
    /// Smallest size allowed for every part except the last
    pub min_part_size: u64,

    /// Largest size allowed for any part
    pub max_part_size: u64,

    /// Maximum number of parts in one upload
    pub max_parts: u32,

    /// Largest object the server accepts
    pub max_object_size: u64,

    /// Known sizes at or below this go through one direct PUT
    pub single_put_threshold: u64,

    /// Derived part sizes are rounded up to a multiple of this
    pub part_size_granularity: u64,
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        Self {
            min_part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_parts: MAX_PARTS,
            max_object_size: MAX_OBJECT_SIZE,
            single_put_threshold: DEFAULT_PART_SIZE,
            part_size_granularity: DEFAULT_PART_SIZE,
        }
    }
}

impl ProtocolLimits {
    /// Validate that the limits describe a usable protocol
    pub fn validate(&self) -> S3Result<()> {
        if self.min_part_size == 0 {
            return Err(S3Error::InvalidConfig(
                "min_part_size must be at least 1 byte".to_string(),
            ));
        }
        if self.min_part_size > self.max_part_size {
            return Err(S3Error::InvalidConfig(format!(
                "min_part_size {} exceeds max_part_size {}",
                self.min_part_size, self.max_part_size
            )));
        }
        if self.max_parts == 0 {
            return Err(S3Error::InvalidConfig(
                "max_parts must be at least 1".to_string(),
            ));
        }
        if self.part_size_granularity == 0 {
            return Err(S3Error::InvalidConfig(
                "part_size_granularity must be at least 1 byte".to_string(),
            ));
        }
        if self.max_object_size == 0 {
            return Err(S3Error::InvalidConfig(
                "max_object_size must be at least 1 byte".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry settings as they appear in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per request, including the first
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound for a single backoff delay, in milliseconds
    pub max_delay_ms: u64,

    /// Jitter factor (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 20_000,
            jitter_factor: 0.3,
        }
    }
}

impl RetrySettings {
    /// Build the retry policy applied to idempotent requests
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff: BackoffStrategy::ExponentialWithJitter,
            jitter_factor: self.jitter_factor,
            ..RetryPolicy::default()
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Client configuration, owned by each client instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Endpoint URL, e.g. `https://s3.us-east-1.amazonaws.com` or `http://localhost:9000`
    pub endpoint: String,

    /// Region used by the signer
    #[serde(default)]
    pub region: Option<String>,

    /// Server limits
    #[serde(default)]
    pub limits: ProtocolLimits,

    /// Retry behaviour for idempotent requests
    #[serde(default)]
    pub retry: RetrySettings,

    /// Default number of parallel part uploads
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Upper bound for the best-effort abort call, in seconds
    #[serde(default = "default_abort_timeout")]
    pub abort_timeout_secs: u64,

    /// Per-request timeout applied by the transport, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Application identifier appended to the user agent
    #[serde(default)]
    pub app_info: Option<String>,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_abort_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300 // 5 minutes
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:9000".to_string())
    }
}

impl ClientConfig {
    /// Create a config for the given endpoint with default limits
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            region: None,
            limits: ProtocolLimits::default(),
            retry: RetrySettings::default(),
            concurrency: DEFAULT_CONCURRENCY,
            abort_timeout_secs: default_abort_timeout(),
            request_timeout_secs: default_request_timeout(),
            app_info: None,
            log_level: LogLevel::Info,
            log_file: None,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> S3Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            S3Error::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: ClientConfig = toml::from_str(&contents)
            .map_err(|e| S3Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> S3Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| S3Error::InvalidConfig(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| {
            S3Error::InvalidConfig(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> S3Result<()> {
        if self.endpoint.is_empty() {
            return Err(S3Error::InvalidConfig(
                "Endpoint cannot be empty".to_string(),
            ));
        }

        self.limits.validate()?;

        if self.concurrency == 0 {
            return Err(S3Error::InvalidConfig(
                "Concurrency must be at least 1".to_string(),
            ));
        }

        if self.concurrency > MAX_CONCURRENCY {
            return Err(S3Error::InvalidConfig(format!(
                "Concurrency {} exceeds maximum {}",
                self.concurrency, MAX_CONCURRENCY
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(S3Error::InvalidConfig(
                "Retry max_attempts must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(S3Error::InvalidConfig(format!(
                "Jitter factor {} must be between 0.0 and 1.0",
                self.retry.jitter_factor
            )));
        }

        Ok(())
    }

    /// Abort timeout as a duration
    pub fn abort_timeout(&self) -> Duration {
        Duration::from_secs(self.abort_timeout_secs)
    }

    /// User agent sent with every request
    pub fn user_agent(&self) -> String {
        match &self.app_info {
            Some(info) => format!("s3stream/{} {}", crate::VERSION, info),
            None => format!("s3stream/{}", crate::VERSION),
        }
    }
}

/// Builder for ClientConfig
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder for an endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            config: ClientConfig::new(endpoint.into()),
        }
    }

    /// Set the region
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = Some(region.into());
        self
    }

    /// Replace the protocol limits
    pub fn limits(mut self, limits: ProtocolLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// Replace the retry settings
    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the default number of parallel part uploads
    pub fn concurrency(mut self, count: usize) -> Self {
        self.config.concurrency = count;
        self
    }

    /// Set the abort timeout
    pub fn abort_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.abort_timeout_secs = seconds;
        self
    }

    /// Set the per-request timeout
    pub fn request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.request_timeout_secs = seconds;
        self
    }

    /// Set the application identifier
    pub fn app_info(mut self, info: impl Into<String>) -> Self {
        self.config.app_info = Some(info.into());
        self
    }

    /// Set the log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> S3Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
