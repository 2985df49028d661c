use serde::Deserialize;
use std::time::Duration;

/// Relay bot configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotConfig {
    /// Telegram bot token
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Base URL of the reel webhook; reel links are POSTed here
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/relay-bot").required(false))
            // RELAY__WEBHOOK__URL -> webhook.url
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("bot.token", legacy_env("TELOXIDE_TOKEN"))?
            .set_override_option("webhook.url", legacy_env("WEBHOOK_URL"))?
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.bot.token.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("bot.token".to_string()));
        }
        if self.webhook.url.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("webhook.url".to_string()));
        }
        if let Err(e) = url::Url::parse(&self.webhook.url) {
            return Err(ConfigValidationError::InvalidValue {
                field: "webhook.url".to_string(),
                message: e.to_string(),
            });
        }
        if self.webhook.timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "webhook.timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook.timeout_secs)
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
