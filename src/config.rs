//! Service configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file) is a valid configuration:
//!
//! ```toml
//! [server]
//! port = 8080
//! admin_token = "change-me"
//!
//! [pipeline]
//! workers = 4
//!
//! [extraction]
//! mode = "rules"
//! confidence_threshold = 0.5
//!
//! [store]
//! journal = "/var/lib/cortex-kg/journal.jsonl"
//!
//! [ingest]
//! root = "/srv/documents"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::extract::{DEFAULT_CONFIDENCE_THRESHOLD, RetryPolicy};
use crate::storage::BackendConfig;
use crate::{Error, Result};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "CORTEX_KG_CONFIG";
/// Environment variable naming the deployment environment.
pub const ENVIRONMENT_ENV: &str = "ENVIRONMENT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub extraction: ExtractionConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub schema: SchemaConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        config.apply_env();
        Ok(config)
    }

    /// Load the file named by `CORTEX_KG_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => {
                let mut config = Config::default();
                config.apply_env();
                Ok(config)
            }
        }
    }

    /// `ENVIRONMENT` overrides `server.environment`.
    fn apply_env(&mut self) {
        if let Ok(env) = std::env::var(ENVIRONMENT_ENV) {
            if !env.trim().is_empty() {
                self.server.environment = env;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.extraction.confidence_threshold) {
            return Err(Error::Config(format!(
                "extraction.confidence_threshold must be within [0, 1], got {}",
                self.extraction.confidence_threshold
            )));
        }
        if self.pipeline.workers == 0 {
            return Err(Error::Config("pipeline.workers must be at least 1".into()));
        }
        if self.extraction.mode == ExtractionMode::Model && self.extraction.endpoint.is_none() {
            return Err(Error::Config("extraction.mode = \"model\" needs extraction.endpoint".into()));
        }
        Ok(())
    }

    pub fn backend(&self) -> BackendConfig {
        match &self.store.journal {
            Some(path) => BackendConfig::Journal { path: path.clone() },
            None => BackendConfig::Memory,
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    /// Bearer token for `/admin`. The admin routes are not mounted without one.
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            environment: "development".into(),
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Documents processed concurrently.
    pub workers: usize,
    /// Retries of one failed stage for transient errors.
    pub max_stage_retries: u32,
    /// Manual `retry` calls allowed per document.
    pub max_document_retries: u32,
    pub retry_base_delay_ms: u64,
    pub extraction_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_stage_retries: 2,
            max_document_retries: 3,
            retry_base_delay_ms: 100,
            extraction_timeout_secs: 120,
        }
    }
}

impl PipelineConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Backoff before stage retry number `retry` (0-based): base × 2^retry,
    /// saturating.
    pub fn retry_delay(&self, retry: u32) -> Duration {
        self.retry_base_delay().saturating_mul(2u32.saturating_pow(retry))
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    #[default]
    Rules,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub mode: ExtractionMode,
    pub confidence_threshold: f64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub call_timeout_secs: u64,
    /// Base URL of an OpenAI-compatible API.
    pub endpoint: Option<String>,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Rules,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_attempts: 3,
            backoff_base_ms: 250,
            call_timeout_secs: 30,
            endpoint: None,
            model: "gpt-4o-mini".into(),
            api_key_env: "CORTEX_KG_MODEL_API_KEY".into(),
        }
    }
}

impl ExtractionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON-lines commit journal. In-memory only when unset.
    pub journal: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directory that `path` and `file://` sources must resolve inside.
    /// Unset means any readable file for local callers, and none over HTTP.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Initial schema (TOML or JSON). The built-in regulatory schema when unset.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, used when `CORTEX_KG_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "cortex_kg=info".into() }
    }
}
