//! Configuration for Stowage

use crate::{Result, StowageError};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// SigV4 presigned URLs cannot outlive seven days
pub const MAX_PRESIGN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
}

/// Transport used for the connection handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// S3-compatible HTTP endpoint (R2, S3, MinIO)
    #[default]
    S3,
    /// In-process store; nothing leaves the process
    Memory,
}

impl BackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "s3" | "r2" => Some(Self::S3),
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Object store connection configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,

    /// Endpoint URL (e.g. `https://<account>.r2.cloudflarestorage.com`)
    pub endpoint_url: Option<String>,

    pub access_key_id: Option<String>,

    pub secret_access_key: Option<String>,

    /// Signing region ("auto" for R2)
    pub region: String,

    /// Bucket used when a descriptor leaves its bucket empty
    pub default_bucket: String,

    /// Address buckets as `<endpoint>/<bucket>` instead of `<bucket>.<endpoint>`
    pub force_path_style: bool,

    /// Per-operation timeout in seconds (0 = no timeout)
    pub operation_timeout_secs: u64,

    /// Upper bound for presigned URL lifetimes
    pub presign_max_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::S3,
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            region: "auto".to_string(),
            default_bucket: String::new(),
            force_path_style: true,
            operation_timeout_secs: 0,
            presign_max_ttl_secs: MAX_PRESIGN_TTL_SECS,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .field("default_bucket", &self.default_bucket)
            .field("force_path_style", &self.force_path_style)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("presign_max_ttl_secs", &self.presign_max_ttl_secs)
            .finish()
    }
}

impl StorageConfig {
    /// In-process configuration for tests and local development
    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    /// Check required fields, reporting every missing one at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.backend == BackendKind::S3 {
            if is_blank(self.endpoint_url.as_deref()) {
                problems.push("endpoint_url is required".to_string());
            }
            if is_blank(self.access_key_id.as_deref()) {
                problems.push("access_key_id is required".to_string());
            }
            if is_blank(self.secret_access_key.as_deref()) {
                problems.push("secret_access_key is required".to_string());
            }
            if self.region.trim().is_empty() {
                problems.push("region must not be empty".to_string());
            }
        }

        if self.presign_max_ttl_secs == 0 || self.presign_max_ttl_secs > MAX_PRESIGN_TTL_SECS {
            problems.push(format!(
                "presign_max_ttl_secs must be within 1..={MAX_PRESIGN_TTL_SECS}"
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(StowageError::Config(problems.join("; ")))
        }
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,

    /// `app_name` label attached to every series
    pub app_name: String,

    /// `host_name` label attached to every series
    pub host_name: String,

    /// Histogram buckets for operation latency, in seconds
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "unknown".to_string()),
            host_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            latency_buckets: vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| StowageError::Config(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| StowageError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let storage = &mut config.storage;

        if let Some(kind) = lookup("STOWAGE_BACKEND").and_then(|v| BackendKind::parse(&v)) {
            storage.backend = kind;
        }

        if let Some(url) = lookup("STOWAGE_ENDPOINT_URL") {
            storage.endpoint_url = Some(url);
        }

        if let Some(key) = lookup("STOWAGE_ACCESS_KEY_ID") {
            storage.access_key_id = Some(key);
        }

        if let Some(secret) = lookup("STOWAGE_SECRET_ACCESS_KEY") {
            storage.secret_access_key = Some(secret);
        }

        if let Some(region) = lookup("STOWAGE_REGION") {
            storage.region = region;
        }

        if let Some(bucket) = lookup("STOWAGE_DEFAULT_BUCKET") {
            storage.default_bucket = bucket;
        }

        if let Some(flag) = lookup("STOWAGE_FORCE_PATH_STYLE") {
            storage.force_path_style = parse_flag(&flag);
        }

        if let Some(n) = lookup("STOWAGE_OPERATION_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            storage.operation_timeout_secs = n;
        }

        if let Some(enabled) = lookup("STOWAGE_METRICS_ENABLED") {
            config.metrics.enabled = parse_flag(&enabled);
        }

        config
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
