//! Configuration type definitions for the engine
//!
//! Every section is optional in YAML; omitted values fall back to the
//! defaults below, so an empty document is a valid configuration.

use crate::engine::HealOptions;
use crate::errors::EngineError;
use crate::resolver::TechStack;
use crate::sandbox::{Language, SandboxLimits};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub tech_stack: TechStack,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Docker,
    Process,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Docker => write!(f, "docker"),
            BackendKind::Process => write!(f, "process"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "process" => Ok(BackendKind::Process),
            other => Err(EngineError::ConfigError(format!(
                "Unknown sandbox backend '{}' (expected docker or process)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub language: Language,
    /// Overrides the language's default container image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,
    #[serde(default = "default_true")]
    pub network_disabled: bool,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_role")]
    pub role: String,
    /// Extra environment for the run step. `${NAME}` values are read from
    /// the host environment at load time.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::default(),
            language: Language::default(),
            image: None,
            timeout_secs: default_timeout_secs(),
            memory_limit_mb: default_memory_limit_mb(),
            cpu_limit: default_cpu_limit(),
            network_disabled: true,
            parallelism: default_parallelism(),
            role: default_role(),
            env: BTreeMap::new(),
        }
    }
}

impl ExecutionConfig {
    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            timeout: Duration::from_secs(self.timeout_secs),
            memory_limit_mb: self.memory_limit_mb,
            cpu_limit: self.cpu_limit,
            network_disabled: self.network_disabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: u32,
    #[serde(default = "default_stderr_excerpt_chars")]
    pub stderr_excerpt_chars: usize,
    /// Shell command that reads a repair request on stdin and prints the
    /// corrected file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair_command: Option<String>,
    #[serde(default = "default_repair_timeout_secs")]
    pub repair_timeout_secs: u64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_fix_attempts: default_max_fix_attempts(),
            stderr_excerpt_chars: default_stderr_excerpt_chars(),
            repair_command: None,
            repair_timeout_secs: default_repair_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), EngineError> {
        let execution = &self.execution;
        if execution.timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "execution.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if execution.memory_limit_mb == 0 {
            return Err(EngineError::ConfigError(
                "execution.memory_limit_mb must be greater than 0".to_string(),
            ));
        }
        if execution.cpu_limit.is_nan() || execution.cpu_limit <= 0.0 {
            return Err(EngineError::ConfigError(
                "execution.cpu_limit must be greater than 0".to_string(),
            ));
        }
        if execution.parallelism == 0 {
            return Err(EngineError::ConfigError(
                "execution.parallelism must be at least 1".to_string(),
            ));
        }
        if execution.role.trim().is_empty() {
            return Err(EngineError::ConfigError("execution.role cannot be empty".to_string()));
        }
        if let Some(image) = &execution.image {
            if image.trim().is_empty() {
                return Err(EngineError::ConfigError("execution.image cannot be empty".to_string()));
            }
        }

        let healing = &self.healing;
        if healing.max_fix_attempts == 0 {
            return Err(EngineError::ConfigError(
                "healing.max_fix_attempts must be at least 1".to_string(),
            ));
        }
        if healing.repair_timeout_secs == 0 {
            return Err(EngineError::ConfigError(
                "healing.repair_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if let Some(command) = &healing.repair_command {
            if command.trim().is_empty() {
                return Err(EngineError::ConfigError(
                    "healing.repair_command cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn heal_options(&self) -> HealOptions {
        HealOptions {
            execution_enabled: self.execution.enabled,
            self_healing_enabled: self.healing.enabled,
            max_fix_attempts: self.healing.max_fix_attempts,
        }
    }
}

fn default_true() -> bool { true }
fn default_timeout_secs() -> u64 { 60 }
fn default_memory_limit_mb() -> u64 { 512 }
fn default_cpu_limit() -> f64 { 1.0 }
fn default_parallelism() -> usize { 1 }
fn default_role() -> String { crate::orchestrator::DEFAULT_ROLE.to_string() }
fn default_max_fix_attempts() -> u32 { 3 }
fn default_stderr_excerpt_chars() -> usize { crate::repair::DEFAULT_STDERR_EXCERPT_CHARS }
fn default_repair_timeout_secs() -> u64 { 120 }
