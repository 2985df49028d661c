use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the webhook service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Object storage configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Instagram scraper configuration
    #[serde(default)]
    pub scraper: ScraperConfig,
    /// Ingest pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
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

/// Object storage configuration (Cloudflare R2 or any S3-compatible store)
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Access key ID
    #[serde(default)]
    pub access_key_id: String,
    /// Secret access key
    #[serde(default)]
    pub secret_access_key: String,
    /// Bucket holding the reel videos
    #[serde(default)]
    pub bucket: String,
    /// R2 account identifier, used to derive the endpoint
    #[serde(default)]
    pub account_id: String,
    /// Explicit endpoint URL (overrides the one derived from `account_id`)
    pub endpoint_url: Option<String>,
    /// Region ("auto" for R2)
    #[serde(default = "default_region")]
    pub region: String,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL, or `memory://` for the in-process ledger
    #[serde(default)]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Instagram scraper configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScraperConfig {
    /// GraphQL persisted query id for shortcode lookups (rotates every few weeks)
    #[serde(default = "default_doc_id")]
    pub doc_id: String,
    /// User agent sent to Instagram and the CDN
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_scraper_timeout_secs")]
    pub timeout_secs: u64,
}

/// How the webhook runs the upload and persist steps
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Respond only after upload and persistence finished
    Sync,
    /// Respond after resolution; upload and persistence run on the worker pool
    #[default]
    Async,
}

/// Ingest pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub mode: PipelineMode,
    /// Maximum number of concurrent background uploads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Records older than this are pruned after each insert
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Scratch directory for synchronous downloads
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
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
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "reel-webhook".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    604_800 // 7 days, the SigV4 maximum
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_doc_id() -> String {
    "8845758582119845".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string()
}

fn default_scraper_timeout_secs() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_retention_days() -> u32 {
    6
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("reels")
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    5000
}

/// Marker URL selecting the in-process ledger instead of PostgreSQL
pub const MEMORY_DATABASE_URL: &str = "memory://";

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/webhook").required(false))
            .add_source(config::File::with_name("/etc/reel-webhook/webhook").required(false))
            // Override with environment variables
            // WEBHOOK__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("WEBHOOK")
                    .separator("__")
                    .try_parsing(true),
            )
            // Variable names used by earlier deployments
            .set_override_option("s3.access_key_id", legacy_env("R2_ACCESS_KEY_ID"))?
            .set_override_option("s3.secret_access_key", legacy_env("R2_SECRET_ACCESS_KEY"))?
            .set_override_option("s3.bucket", legacy_env("R2_BUCKET_NAME"))?
            .set_override_option("s3.account_id", legacy_env("R2_ACCOUNT_ID"))?
            .set_override_option("database.url", legacy_env("DATABASE_URL"))?
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value needed at runtime is present
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let required = [
            ("s3.access_key_id", &self.s3.access_key_id),
            ("s3.secret_access_key", &self.s3.secret_access_key),
            ("s3.bucket", &self.s3.bucket),
            ("database.url", &self.database.url),
            ("scraper.doc_id", &self.scraper.doc_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigValidationError::MissingField(field.to_string()));
            }
        }

        if self.s3.account_id.trim().is_empty() && self.s3.endpoint_url.is_none() {
            return Err(ConfigValidationError::MissingField(
                "s3.account_id".to_string(),
            ));
        }

        // SigV4 presigning refuses anything past one week
        if self.s3.presigned_url_expiry_secs == 0 || self.s3.presigned_url_expiry_secs > 604_800 {
            return Err(ConfigValidationError::InvalidValue {
                field: "s3.presigned_url_expiry_secs".to_string(),
                message: "must be between 1 and 604800 seconds".to_string(),
            });
        }

        if self.pipeline.workers == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "pipeline.workers".to_string(),
                message: "at least one worker is required".to_string(),
            });
        }

        Ok(())
    }

    /// Whether the ledger should live in process memory
    pub fn uses_memory_ledger(&self) -> bool {
        self.database.url == MEMORY_DATABASE_URL
    }
}

impl S3Config {
    /// Endpoint URL, derived from the account id unless set explicitly
    pub fn endpoint(&self) -> String {
        match &self.endpoint_url {
            Some(url) => url.clone(),
            None => format!("https://{}.r2.cloudflarestorage.com", self.account_id),
        }
    }
}

impl ScraperConfig {
    /// Get request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
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

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            bucket: String::new(),
            account_id: String::new(),
            endpoint_url: None,
            region: default_region(),
            presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: true,
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            doc_id: default_doc_id(),
            user_agent: default_user_agent(),
            timeout_secs: default_scraper_timeout_secs(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            workers: default_workers(),
            retention_days: default_retention_days(),
            temp_dir: default_temp_dir(),
        }
    }
}

fn legacy_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
