use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    pub processing: ProcessingConfig,
    pub enrichment: EnrichmentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    pub max_upload_size_mb: u64,
    pub cleanup_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            read_timeout_seconds: 10,
            write_timeout_seconds: 10,
            idle_timeout_seconds: 60,
            shutdown_timeout_seconds: 15,
            max_upload_size_mb: 10,
            cleanup_interval_seconds: 3_600,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn max_upload_size_bytes(&self) -> usize {
        (self.max_upload_size_mb as usize) * 1024 * 1024
    }
}

/// One authenticated upstream session. `session_file` receives the opaque
/// login state so restarts do not repeat the interactive flow.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramServerConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub phone_number: String,
    pub session_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub servers: Vec<TelegramServerConfig>,
    pub health_check_interval_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            health_check_interval_seconds: 30,
        }
    }
}

impl TelegramConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// 0 means the task runs without an overall deadline.
    pub task_timeout_seconds: i64,
    pub cache_ttl_minutes: u64,
    pub task_ttl_hours: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            task_timeout_seconds: 0,
            cache_ttl_minutes: 60,
            task_ttl_hours: 24,
        }
    }
}

impl ProcessingConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        if self.task_timeout_seconds > 0 {
            Some(Duration::from_secs(self.task_timeout_seconds as u64))
        } else {
            None
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }

    pub fn task_ttl(&self) -> Duration {
        Duration::from_secs(self.task_ttl_hours * 3_600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub pool_size: usize,
    pub client_retry_pause_seconds: u64,
    pub operation_timeout_seconds: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            client_retry_pause_seconds: 1,
            operation_timeout_seconds: 5,
        }
    }
}

impl EnrichmentConfig {
    pub fn client_retry_pause(&self) -> Duration {
        Duration::from_secs(self.client_retry_pause_seconds)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl AppConfig {
    /// Rejects configurations the service cannot safely start with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.telegram.servers.is_empty() {
            anyhow::bail!("telegram.servers must list at least one session");
        }
        for (i, server) in self.telegram.servers.iter().enumerate() {
            if server.api_id <= 0 {
                anyhow::bail!("telegram.servers[{i}].api_id must be a positive integer");
            }
            if server.api_hash.is_empty() {
                anyhow::bail!("telegram.servers[{i}].api_hash must not be empty");
            }
            if server.phone_number.is_empty() {
                anyhow::bail!("telegram.servers[{i}].phone_number must not be empty");
            }
        }
        if self.server.port == 0 {
            anyhow::bail!("server.port must be a valid port number (1-65535)");
        }
        if self.server.read_timeout_seconds == 0
            || self.server.write_timeout_seconds == 0
            || self.server.idle_timeout_seconds == 0
            || self.server.shutdown_timeout_seconds == 0
        {
            anyhow::bail!("server timeouts must be positive");
        }
        if self.server.max_upload_size_mb == 0 {
            anyhow::bail!("server.max_upload_size_mb must be positive");
        }
        if self.server.cleanup_interval_seconds == 0 {
            anyhow::bail!("server.cleanup_interval_seconds must be positive");
        }
        if self.telegram.health_check_interval_seconds == 0 {
            anyhow::bail!("telegram.health_check_interval_seconds must be positive");
        }
        if self.processing.task_timeout_seconds < 0 {
            anyhow::bail!("processing.task_timeout_seconds must be non-negative (0 for no limit)");
        }
        if self.processing.cache_ttl_minutes == 0 {
            anyhow::bail!("processing.cache_ttl_minutes must be positive");
        }
        if self.processing.task_ttl_hours == 0 {
            anyhow::bail!("processing.task_ttl_hours must be positive");
        }
        if self.enrichment.pool_size == 0 {
            anyhow::bail!("enrichment.pool_size must be positive");
        }
        if self.enrichment.client_retry_pause_seconds == 0 {
            anyhow::bail!("enrichment.client_retry_pause_seconds must be positive");
        }
        if self.enrichment.operation_timeout_seconds == 0 {
            anyhow::bail!("enrichment.operation_timeout_seconds must be positive");
        }
        match self.logging.level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                anyhow::bail!("logging.level must be one of debug/info/warn/error, got {other:?}")
            }
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("logging.format must be text or json, got {other:?}"),
        }
        Ok(())
    }
}

/// Loads the configuration from defaults, an optional file (`ROSTER_CONFIG`
/// or `roster.{toml,yaml}` in the working directory) and `ROSTER`-prefixed
/// environment variables, in increasing precedence.
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("server.host", defaults.server.host.clone())?
        .set_default("server.port", i64::from(defaults.server.port))?
        .set_default(
            "server.read_timeout_seconds",
            defaults.server.read_timeout_seconds as i64,
        )?
        .set_default(
            "server.write_timeout_seconds",
            defaults.server.write_timeout_seconds as i64,
        )?
        .set_default(
            "server.idle_timeout_seconds",
            defaults.server.idle_timeout_seconds as i64,
        )?
        .set_default(
            "server.shutdown_timeout_seconds",
            defaults.server.shutdown_timeout_seconds as i64,
        )?
        .set_default(
            "server.max_upload_size_mb",
            defaults.server.max_upload_size_mb as i64,
        )?
        .set_default(
            "server.cleanup_interval_seconds",
            defaults.server.cleanup_interval_seconds as i64,
        )?
        .set_default(
            "telegram.health_check_interval_seconds",
            defaults.telegram.health_check_interval_seconds as i64,
        )?
        .set_default(
            "processing.task_timeout_seconds",
            defaults.processing.task_timeout_seconds,
        )?
        .set_default(
            "processing.cache_ttl_minutes",
            defaults.processing.cache_ttl_minutes as i64,
        )?
        .set_default(
            "processing.task_ttl_hours",
            defaults.processing.task_ttl_hours as i64,
        )?
        .set_default("enrichment.pool_size", defaults.enrichment.pool_size as i64)?
        .set_default(
            "enrichment.client_retry_pause_seconds",
            defaults.enrichment.client_retry_pause_seconds as i64,
        )?
        .set_default(
            "enrichment.operation_timeout_seconds",
            defaults.enrichment.operation_timeout_seconds as i64,
        )?
        .set_default("logging.level", defaults.logging.level.clone())?
        .set_default("logging.format", defaults.logging.format.clone())?;

    builder = if let Ok(path) = std::env::var("ROSTER_CONFIG") {
        builder.add_source(config::File::with_name(&path).required(false))
    } else {
        builder.add_source(config::File::with_name("roster").required(false))
    };

    let cfg = builder
        .add_source(config::Environment::with_prefix("ROSTER").separator("__"))
        .build()
        .context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    debug!(?config, "loaded roster configuration");
    Ok(config)
}
