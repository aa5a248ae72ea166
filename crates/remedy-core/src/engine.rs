//! Execute-repair-re-execute driver.

use crate::errors::EngineError;
use crate::files::FileSet;
use crate::orchestrator::ExecutionOrchestrator;
use crate::repair::{RepairCapability, SelfHealingLoop};
use crate::resolver::TechStack;
use crate::state::ExecutionState;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealOptions {
    pub execution_enabled: bool,
    pub self_healing_enabled: bool,
    pub max_fix_attempts: u32,
}

impl Default for HealOptions {
    fn default() -> Self {
        Self {
            execution_enabled: true,
            self_healing_enabled: true,
            max_fix_attempts: 3,
        }
    }
}

/// Final file set and the full record of the run.
#[derive(Debug, Clone, Serialize)]
pub struct HealOutcome {
    pub files: FileSet,
    pub state: ExecutionState,
}

impl HealOutcome {
    pub fn needs_revision(&self) -> bool {
        self.state.needs_revision()
    }

    pub fn succeeded(&self) -> bool {
        self.state.all_succeeded()
    }
}

pub struct HealingEngine {
    orchestrator: ExecutionOrchestrator,
    healing: SelfHealingLoop,
    repair: Arc<dyn RepairCapability>,
    cancel: CancellationToken,
}

impl HealingEngine {
    pub fn new(orchestrator: ExecutionOrchestrator, repair: Arc<dyn RepairCapability>) -> Self {
        Self {
            orchestrator,
            healing: SelfHealingLoop::new(),
            repair,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_healing_loop(mut self, healing: SelfHealingLoop) -> Self {
        self.healing = healing.with_cancellation(self.cancel.clone());
        self
    }

    /// Share `token` with every pass; cancelling it stops the run between
    /// files.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.orchestrator = self.orchestrator.with_cancellation(token.clone());
        self.healing = self.healing.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    pub fn orchestrator(&self) -> &ExecutionOrchestrator {
        &self.orchestrator
    }

    /// Run, repair and re-run until every failing file is fixed or out of
    /// budget.
    ///
    /// Only contract violations are returned as errors; execution and repair
    /// failures are recorded in the returned state.
    pub async fn run_and_heal(
        &self,
        files: FileSet,
        stack: &TechStack,
        options: &HealOptions,
    ) -> Result<HealOutcome, EngineError> {
        if options.max_fix_attempts == 0 {
            return Err(EngineError::ConfigError(
                "max_fix_attempts must be at least 1".to_string(),
            ));
        }

        let mut files = files;
        let mut state = ExecutionState::new(options.max_fix_attempts);

        if !options.execution_enabled {
            log::info!("Execution disabled; returning {} file(s) untouched", files.len());
            return Ok(HealOutcome { files, state });
        }

        loop {
            self.orchestrator.run(&files, stack, true, &mut state).await;

            if state.sandbox_unavailable {
                log::warn!("Sandbox unavailable; no further execution will be attempted");
                break;
            }
            if !options.self_healing_enabled {
                log::debug!("Self-healing disabled; stopping after pass {}", state.passes);
                break;
            }
            if self.cancel.is_cancelled() {
                log::info!("Run cancelled after pass {}", state.passes);
                break;
            }
            if !state.needs_revision() {
                break;
            }

            let report = self
                .healing
                .repair(&mut files, &mut state, self.repair.as_ref())
                .await;
            log::info!(
                "Repair pass {}: {} repaired, {} failed, {} exhausted",
                state.passes,
                report.repaired.len(),
                report.failed.len(),
                report.exhausted.len()
            );
            if report.cancelled || report.attempted() == 0 {
                break;
            }
        }

        if state.errors.is_empty() {
            log::info!("All executed files succeeded after {} pass(es)", state.passes);
        } else {
            log::warn!(
                "{} file(s) still failing after {} pass(es): {}",
                state.errors.len(),
                state.passes,
                state.errors.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }

        Ok(HealOutcome { files, state })
    }
}
