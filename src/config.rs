use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL; wins over the individual fields when set.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub max_concurrent_jobs: usize,
    pub batch_size: usize,
    pub job_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// IANA name used when a job definition has no timezone.
    pub default_timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve the status endpoints alongside the scheduler.
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            server: ServerConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".into(),
            port: 5432,
            name: "analytics_db".into(),
            user: "postgres".into(),
            password: String::new(),
            max_connections: 10,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            max_concurrent_jobs: 10,
            batch_size: 1000,
            job_timeout_secs: 3600,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            default_timezone: "UTC".into(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".into(),
            port: 8090,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl DatabaseConfig {
    pub fn connection_url(&self) -> String {
        match &self.url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.name
            ),
        }
    }
}

impl AppConfig {
    /// Reads `CONFIG_FILE` (default `config.toml`; a missing file means defaults), then
    /// applies environment overrides and validates.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(s) => toml::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
            Err(e) => return Err(e.into()),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment-style overrides. `lookup` returns the value for a key, if set.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> anyhow::Result<T>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e))
        }

        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = lookup("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = lookup("DB_PORT") {
            self.database.port = parsed("DB_PORT", v)?;
        }
        if let Some(v) = lookup("DB_NAME") {
            self.database.name = v;
        }
        if let Some(v) = lookup("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            self.database.password = v;
        }
        if let Some(v) = lookup("DB_MAX_CONNECTIONS") {
            self.database.max_connections = parsed("DB_MAX_CONNECTIONS", v)?;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_JOBS") {
            self.scheduler.max_concurrent_jobs = parsed("MAX_CONCURRENT_JOBS", v)?;
        }
        if let Some(v) = lookup("BATCH_SIZE") {
            self.scheduler.batch_size = parsed("BATCH_SIZE", v)?;
        }
        if let Some(v) = lookup("JOB_TIMEOUT") {
            self.scheduler.job_timeout_secs = parsed("JOB_TIMEOUT", v)?;
        }
        if let Some(v) = lookup("MAX_RETRIES") {
            self.scheduler.max_retries = parsed("MAX_RETRIES", v)?;
        }
        if let Some(v) = lookup("RETRY_DELAY_MS") {
            self.scheduler.retry_base_delay_ms = parsed("RETRY_DELAY_MS", v)?;
        }
        if let Some(v) = lookup("SCHEDULER_CHECK_INTERVAL") {
            self.scheduler.tick_interval_secs = parsed("SCHEDULER_CHECK_INTERVAL", v)?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("SERVER_PORT") {
            self.server.port = parsed("SERVER_PORT", v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.server.enabled || self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.connection_url().is_empty(),
            "database.url must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_connections > 0,
            "database.max_connections must be > 0, got {}",
            self.database.max_connections
        );
        anyhow::ensure!(
            self.scheduler.tick_interval_secs > 0,
            "scheduler.tick_interval_secs must be > 0, got {}",
            self.scheduler.tick_interval_secs
        );
        anyhow::ensure!(
            self.scheduler.max_concurrent_jobs > 0,
            "scheduler.max_concurrent_jobs must be > 0, got {}",
            self.scheduler.max_concurrent_jobs
        );
        anyhow::ensure!(
            self.scheduler.batch_size > 0,
            "scheduler.batch_size must be > 0, got {}",
            self.scheduler.batch_size
        );
        anyhow::ensure!(
            self.scheduler.job_timeout_secs > 0,
            "scheduler.job_timeout_secs must be > 0, got {}",
            self.scheduler.job_timeout_secs
        );
        anyhow::ensure!(
            self.scheduler.retry_base_delay_ms <= self.scheduler.retry_max_delay_ms,
            "scheduler.retry_base_delay_ms ({}) must be <= scheduler.retry_max_delay_ms ({})",
            self.scheduler.retry_base_delay_ms,
            self.scheduler.retry_max_delay_ms
        );
        anyhow::ensure!(
            self.scheduler.default_timezone.parse::<Tz>().is_ok(),
            "scheduler.default_timezone {:?} is not a known IANA zone",
            self.scheduler.default_timezone
        );
        anyhow::ensure!(!self.log_level.trim().is_empty(), "log_level must be non-empty");
        Ok(())
    }

    /// Engine settings derived from `[scheduler]`. Call after `validate()`.
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let s = &self.scheduler;
        let default_timezone: Tz = s
            .default_timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown timezone {:?}", s.default_timezone))?;
        Ok(EngineConfig {
            tick_interval: Duration::from_secs(s.tick_interval_secs),
            max_concurrent_jobs: s.max_concurrent_jobs,
            batch_size: s.batch_size,
            job_timeout: Duration::from_secs(s.job_timeout_secs),
            retry: RetryPolicy {
                max_retries: s.max_retries,
                base_delay: Duration::from_millis(s.retry_base_delay_ms),
                max_delay: Duration::from_millis(s.retry_max_delay_ms),
            },
            default_timezone,
        })
    }
}
