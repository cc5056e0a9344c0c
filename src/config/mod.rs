//! Application configuration.
//!
//! Aggregates engine settings and the streams and buckets to declare at
//! startup into a single Config struct that can be loaded from YAML files or
//! environment variables.

mod limits;

pub use limits::{
    EngineConfig, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_SWEEP_INTERVAL, DEFAULT_WATCH_BUFFER,
};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "JETLOG_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "JETLOG";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "JETLOG_LOG";

use serde::Deserialize;

use crate::error::Result;
use crate::kv::KvConfig;
use crate::stream::StreamConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine-wide limits and timers.
    pub engine: EngineConfig,
    /// Streams created at startup.
    pub streams: Vec<StreamConfig>,
    /// Key-value buckets created at startup.
    pub key_value: Vec<KvConfig>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self {
            engine: EngineConfig::for_test(),
            ..Default::default()
        }
    }

    /// Validate engine settings and every declared stream and bucket.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        for stream in &self.streams {
            stream.validate()?;
        }
        for bucket in &self.key_value {
            bucket.validate()?;
        }
        Ok(())
    }
}
