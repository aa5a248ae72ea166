//! Configuration loader for YAML files and environment resolution

use crate::config::types::EngineConfig;
use crate::errors::EngineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::env;
use std::path::Path;
use tokio::fs;

static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$\{([A-Za-z_][A-Za-z0-9_]*)\}$").expect("env reference pattern must compile")
});

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<EngineConfig, EngineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await.map_err(|e| {
            EngineError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_str(&content)
    }

    /// Parse, resolve and validate a YAML document. An empty document yields
    /// the defaults.
    pub fn from_str(content: &str) -> Result<EngineConfig, EngineError> {
        let mut config: EngineConfig = if content.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| EngineError::ConfigError(format!("Failed to parse YAML config: {}", e)))?
        };

        Self::resolve_environment(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn resolve_environment(config: &mut EngineConfig) -> Result<(), EngineError> {
        for (key, value) in config.execution.env.iter_mut() {
            let Some(captures) = ENV_REFERENCE.captures(value) else {
                continue;
            };
            let name = &captures[1];
            let resolved = env::var(name).map_err(|_| {
                EngineError::ConfigError(format!(
                    "execution.env.{} references unset environment variable {}",
                    key, name
                ))
            })?;
            *value = resolved;
        }
        Ok(())
    }
}
