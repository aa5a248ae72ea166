//! Assembles a ready-to-run [`HealingEngine`] from an [`EngineConfig`].

use crate::config::types::{BackendKind, EngineConfig};
use crate::engine::HealingEngine;
use crate::errors::{EngineError, RepairError};
use crate::orchestrator::ExecutionOrchestrator;
use crate::repair::{CommandRepair, RepairCapability, RepairRequest, SelfHealingLoop};
use crate::sandbox::{DockerSandbox, ProcessSandbox, SandboxBackend, SandboxRunner};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct EngineBuilder {
    config: EngineConfig,
    backend: Option<Arc<dyn SandboxBackend>>,
    repair: Option<Arc<dyn RepairCapability>>,
    cancel: CancellationToken,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            backend: None,
            repair: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use this backend instead of the one named in the config.
    pub fn backend(mut self, backend: Arc<dyn SandboxBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use this capability instead of `healing.repair_command`.
    pub fn repair(mut self, repair: Arc<dyn RepairCapability>) -> Self {
        self.repair = Some(repair);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Probe the sandbox backend and wire up the engine.
    pub async fn build(self) -> Result<HealingEngine, EngineError> {
        self.config.validate()?;
        let execution = &self.config.execution;
        let healing = &self.config.healing;

        let repair: Arc<dyn RepairCapability> = match (self.repair, &healing.repair_command) {
            (Some(repair), _) => repair,
            (None, Some(command)) => Arc::new(
                CommandRepair::new(command.clone())
                    .with_timeout(Duration::from_secs(healing.repair_timeout_secs)),
            ),
            (None, None) if healing.enabled => {
                return Err(EngineError::ConfigError(
                    "Self-healing is enabled but no repair_command is configured".to_string(),
                ));
            }
            (None, None) => Arc::new(NoRepair),
        };

        let limits = execution.limits();
        let runner = match self.backend {
            Some(backend) => SandboxRunner::new(backend, limits).await,
            None => match execution.backend {
                BackendKind::Process => {
                    let backend = ProcessSandbox::new(execution.language, execution.network_disabled);
                    SandboxRunner::new(Arc::new(backend), limits).await
                }
                BackendKind::Docker => match DockerSandbox::connect() {
                    Ok(docker) => {
                        let docker = match &execution.image {
                            Some(image) => docker.with_image(image.clone()),
                            None => docker,
                        };
                        SandboxRunner::new(Arc::new(docker), limits).await
                    }
                    Err(e) => {
                        log::warn!("Could not create Docker client: {}", e);
                        SandboxRunner::unreachable("docker", e.to_string(), limits).await
                    }
                },
            },
        };

        let orchestrator = ExecutionOrchestrator::new(Arc::new(runner), execution.language)
            .with_role(execution.role.clone())
            .with_env(execution.env.clone())
            .with_parallelism(execution.parallelism);

        Ok(HealingEngine::new(orchestrator, repair)
            .with_healing_loop(
                SelfHealingLoop::new().with_stderr_excerpt_chars(healing.stderr_excerpt_chars),
            )
            .with_cancellation(self.cancel))
    }
}

// Placeholder for runs with healing disabled; never called by the engine.
struct NoRepair;

#[async_trait]
impl RepairCapability for NoRepair {
    async fn repair(&self, _request: &RepairRequest) -> Result<String, RepairError> {
        Err(RepairError::Failed("no repair capability configured".to_string()))
    }
}
