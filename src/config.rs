//! Configuration loading.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. Optional YAML file
//! 3. Environment variables prefixed with `HNBS_`, using `__` between nested
//!    keys (`HNBS_CACHE__TTL_SECS=60` overrides `cache.ttl_secs`)
//!
//! Everything is read once at startup.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::hn_client::HackerNewsClientConfig;
use crate::retry::RetryPolicy;
use crate::service::ServiceConfig;
use crate::{admission, circuit_breaker};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub admission: AdmissionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SourceSettings {
    pub base_url: String,
    pub list_path: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        let client = HackerNewsClientConfig::default();
        Self {
            base_url: client.base_url,
            list_path: client.list_path,
            request_timeout_secs: client.request_timeout.as_secs(),
            user_agent: client.user_agent,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_count: usize,
    pub warm_on_start: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 120,
            max_count: 100,
            warm_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FetchSettings {
    pub max_concurrency: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: crate::fetcher::DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AdmissionSettings {
    pub permit_limit: u32,
    pub window_secs: u64,
    pub segments: u32,
    pub purge_interval_secs: u64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            permit_limit: 20,
            window_secs: 60,
            segments: 4,
            purge_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

const ENV_PREFIX: &str = "HNBS";

impl AppConfig {
    /// Loads `path` (YAML) on top of the defaults, then applies env overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            .add_source(env_source())
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Defaults plus env overrides only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(env_source())
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        let checks: [(&str, bool); 10] = [
            ("server.port", self.server.port > 0),
            ("source.request_timeout_secs", self.source.request_timeout_secs > 0),
            ("cache.ttl_secs", self.cache.ttl_secs > 0),
            ("cache.max_count", self.cache.max_count > 0),
            ("fetch.max_concurrency", self.fetch.max_concurrency > 0),
            ("breaker.failure_threshold", self.breaker.failure_threshold > 0),
            ("admission.permit_limit", self.admission.permit_limit > 0),
            ("admission.window_secs", self.admission.window_secs > 0),
            ("admission.segments", self.admission.segments > 0),
            ("admission.purge_interval_secs", self.admission.purge_interval_secs > 0),
        ];
        if let Some((key, _)) = checks.iter().find(|(_, ok)| !ok) {
            return Err(ConfigLoadError::Invalid {
                message: format!("{key} must be greater than 0"),
            });
        }

        if self.source.base_url.trim().is_empty() {
            return Err(ConfigLoadError::Invalid {
                message: "source.base_url must not be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn client_config(&self) -> HackerNewsClientConfig {
        HackerNewsClientConfig {
            base_url: self.source.base_url.clone(),
            list_path: self.source.list_path.clone(),
            request_timeout: self.request_timeout(),
            user_agent: self.source.user_agent.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.source.request_timeout_secs)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            max_count: self.cache.max_count,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }

    pub fn breaker_config(&self) -> circuit_breaker::Config {
        circuit_breaker::Config {
            failure_threshold: self.breaker.failure_threshold,
            cooldown: Duration::from_secs(self.breaker.cooldown_secs),
        }
    }

    pub fn admission_config(&self) -> admission::Config {
        admission::Config {
            permit_limit: self.admission.permit_limit,
            window: Duration::from_secs(self.admission.window_secs),
            segments: self.admission.segments,
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
