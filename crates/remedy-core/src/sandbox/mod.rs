//! Sandboxed execution of generated code.
//!
//! A [`SandboxBackend`] provisions a fresh isolated environment per call
//! (container or namespaced process), materializes the file set into it,
//! installs declared dependencies, runs the entry point under the configured
//! limits and tears everything down again. Backends report failures as
//! [`SandboxError`]; the [`SandboxRunner`] turns every outcome, including
//! timeouts and backend breakage, into an [`ExecutionResult`] so callers never
//! have to handle errors for ordinary execution failures.

use crate::errors::SandboxError;
use crate::files::FileSet;
use crate::result::ExecutionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod docker;
pub mod language;
pub mod process;
pub mod workspace;

pub use docker::DockerSandbox;
pub use language::Language;
pub use process::ProcessSandbox;

/// Resource ceiling applied to every sandbox invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Wall-clock budget covering dependency install and the run itself.
    pub timeout: Duration,
    pub memory_limit_mb: u64,
    /// CPU share in cores (1.0 = one core).
    pub cpu_limit: f64,
    pub network_disabled: bool,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            memory_limit_mb: 512,
            cpu_limit: 1.0,
            network_disabled: true,
        }
    }
}

/// One unit of work for a backend: run `entry_point` with the whole file set
/// available next to it.
#[derive(Debug, Clone, Copy)]
pub struct SandboxJob<'a> {
    pub entry_point: &'a str,
    pub files: &'a FileSet,
    pub dependencies: &'a [String],
    pub env: &'a BTreeMap<String, String>,
    pub language: Language,
}

/// Exit status and captured streams of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check that the isolation facility is usable. Called once, when the
    /// runner is constructed.
    async fn probe(&self) -> Result<(), SandboxError>;

    /// Run a job to completion. Implementations enforce `limits.timeout`,
    /// returning [`SandboxError::Timeout`] on expiry, and must release every
    /// resource they provisioned on all exit paths.
    async fn run(&self, job: &SandboxJob<'_>, limits: &SandboxLimits) -> Result<RawOutput, SandboxError>;
}

/// Wraps a backend with a one-time availability probe, classification and
/// failure synthesis.
pub struct SandboxRunner {
    backend: Arc<dyn SandboxBackend>,
    limits: SandboxLimits,
    unavailable: Option<String>,
}

impl SandboxRunner {
    pub async fn new(backend: Arc<dyn SandboxBackend>, limits: SandboxLimits) -> Self {
        let unavailable = match backend.probe().await {
            Ok(()) => {
                log::info!("Sandbox backend '{}' is available", backend.name());
                None
            }
            Err(e) => {
                log::warn!("Sandbox backend '{}' is unavailable: {}", backend.name(), e);
                Some(format!("{} backend: {}", backend.name(), e))
            }
        };

        Self {
            backend,
            limits,
            unavailable,
        }
    }

    /// Runner for a backend that could not even be constructed, e.g. when the
    /// Docker client fails to initialize. Every execution is unavailable.
    pub async fn unreachable(name: &'static str, reason: impl Into<String>, limits: SandboxLimits) -> Self {
        let backend = Arc::new(Unreachable {
            name,
            reason: reason.into(),
        });
        Self::new(backend, limits).await
    }

    pub fn is_available(&self) -> bool {
        self.unavailable.is_none()
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Execute one job. Never fails: every outcome is an [`ExecutionResult`].
    pub async fn execute(&self, job: &SandboxJob<'_>) -> ExecutionResult {
        if let Some(reason) = &self.unavailable {
            return ExecutionResult::unavailable(reason);
        }

        log::debug!(
            "Executing '{}' in {} sandbox ({} dependencies)",
            job.entry_point,
            self.backend.name(),
            job.dependencies.len()
        );

        let started = Instant::now();
        let outcome = self.backend.run(job, &self.limits).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(output) => {
                let result = ExecutionResult::from_process(
                    output.exit_code,
                    output.stdout,
                    output.stderr,
                    elapsed,
                );
                if result.has_errors() {
                    log::debug!("'{}' failed: {}", job.entry_point, result.error_summary());
                }
                result
            }
            Err(SandboxError::Timeout) => {
                log::warn!(
                    "Execution of '{}' timed out after {:?}",
                    job.entry_point,
                    self.limits.timeout
                );
                ExecutionResult::timed_out(self.limits.timeout, String::new(), String::new())
            }
            Err(SandboxError::Unavailable(reason)) => ExecutionResult::unavailable(&reason),
            Err(e) => {
                log::error!("Sandbox failure while executing '{}': {}", job.entry_point, e);
                ExecutionResult::internal_failure(&e.to_string(), elapsed)
            }
        }
    }
}

struct Unreachable {
    name: &'static str,
    reason: String,
}

#[async_trait]
impl SandboxBackend for Unreachable {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn probe(&self) -> Result<(), SandboxError> {
        Err(SandboxError::Unavailable(self.reason.clone()))
    }

    async fn run(&self, _job: &SandboxJob<'_>, _limits: &SandboxLimits) -> Result<RawOutput, SandboxError> {
        Err(SandboxError::Unavailable(self.reason.clone()))
    }
}
