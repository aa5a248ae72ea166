//! One execution pass over a file set.
//!
//! The orchestrator resolves entry points and packages, runs each entry point
//! through the [`SandboxRunner`] and folds the results into the
//! [`ExecutionState`] it is handed. It holds no state of its own between
//! passes. Sandbox calls may run concurrently up to `parallelism`, but results
//! are applied one at a time, in entry-point order, after the pass completes.

use crate::files::FileSet;
use crate::resolver::{DependencyResolver, EntryPointResolver, TechStack};
use crate::result::ExecutionResult;
use crate::sandbox::{Language, SandboxJob, SandboxRunner};
use crate::state::ExecutionState;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ROLE: &str = "backend";

pub struct ExecutionOrchestrator {
    runner: Arc<SandboxRunner>,
    entry_points: EntryPointResolver,
    dependencies: DependencyResolver,
    role: String,
    env: BTreeMap<String, String>,
    parallelism: usize,
    cancel: CancellationToken,
}

impl ExecutionOrchestrator {
    pub fn new(runner: Arc<SandboxRunner>, language: Language) -> Self {
        Self {
            runner,
            entry_points: EntryPointResolver::new(language),
            dependencies: DependencyResolver::new(language),
            role: DEFAULT_ROLE.to_string(),
            env: BTreeMap::new(),
            parallelism: 1,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_entry_point_resolver(mut self, resolver: EntryPointResolver) -> Self {
        self.entry_points = resolver;
        self
    }

    pub fn with_dependency_resolver(mut self, resolver: DependencyResolver) -> Self {
        self.dependencies = resolver;
        self
    }

    /// Which tech-stack role supplies the packages to install.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Upper bound on concurrent sandbox invocations. Zero is treated as one.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn runner(&self) -> &SandboxRunner {
        &self.runner
    }

    pub fn language(&self) -> Language {
        self.entry_points.language()
    }

    /// Run one pass and fold the outcome into `state`.
    ///
    /// Executes every resolved entry point plus every file that is still open
    /// in `state` (so repaired modules are re-checked). Files already `Done`
    /// or `Exhausted` are skipped. With `execution_enabled == false` nothing
    /// runs and `state` is left untouched.
    pub async fn run(
        &self,
        files: &FileSet,
        stack: &TechStack,
        execution_enabled: bool,
        state: &mut ExecutionState,
    ) {
        if !execution_enabled {
            log::info!("Execution disabled; skipping sandbox pass");
            return;
        }

        state.passes += 1;
        let targets = self.targets(files, state);
        if targets.is_empty() {
            log::info!("Pass {}: nothing to execute", state.passes);
            return;
        }

        let dependencies: Vec<String> = self
            .dependencies
            .resolve(stack, &self.role)
            .into_iter()
            .collect();
        log::info!(
            "Pass {}: executing {} file(s) in {} sandbox with {} package(s)",
            state.passes,
            targets.len(),
            self.runner.backend_name(),
            dependencies.len()
        );

        let outcomes: Vec<Option<(DateTime<Utc>, ExecutionResult)>> = stream::iter(targets.iter())
            .map(|path| self.execute_one(files, path, &dependencies))
            .buffered(self.parallelism)
            .collect()
            .await;

        // single mutation point, entry-point order
        for (path, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Some((started_at, result)) => {
                    state.begin_execution(path);
                    state.record_result(path, result, started_at);
                }
                None => log::debug!("'{}' skipped: pass cancelled", path),
            }
        }

        log::info!(
            "Pass {} finished: {} failing, needs revision: {}",
            state.passes,
            state.errors.len(),
            state.needs_revision()
        );
    }

    fn targets(&self, files: &FileSet, state: &ExecutionState) -> Vec<String> {
        let mut targets: BTreeSet<String> = self.entry_points.resolve(files).into_iter().collect();
        targets.extend(state.open_files().map(str::to_string));
        targets
            .into_iter()
            .filter(|path| files.contains(path) && !state.is_terminal(path))
            .collect()
    }

    async fn execute_one(
        &self,
        files: &FileSet,
        path: &str,
        dependencies: &[String],
    ) -> Option<(DateTime<Utc>, ExecutionResult)> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let job = SandboxJob {
            entry_point: path,
            files,
            dependencies,
            env: &self.env,
            language: self.language(),
        };
        let started_at = Utc::now();
        Some((started_at, self.runner.execute(&job).await))
    }
}
