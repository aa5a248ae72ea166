//! Sandboxed execution and self-healing retry engine for generated code.
//!
//! Given a set of source files and a declared technology stack, the engine
//! decides which files are entry points, installs the packages the stack
//! implies, runs each entry point in a single-use resource-limited sandbox
//! and classifies what went wrong. Failing files are handed to an injected
//! repair capability and re-executed until they pass or exhaust a per-file
//! attempt budget.
//!
//! # Architecture Overview
//!
//! - **Sandbox**: Docker and local-process backends behind [`sandbox::SandboxBackend`],
//!   wrapped by a runner that never fails and always produces an [`ExecutionResult`]
//! - **Classifier**: line-based error and warning signatures over stderr
//! - **Resolvers**: pluggable entry-point predicates and a framework-to-package table
//! - **Orchestrator**: one execution pass, optionally parallel, with a single
//!   point of state mutation
//! - **Repair loop**: bounded, ordered repair passes over failing files
//! - **Engine**: the execute-repair-re-execute driver behind `run_and_heal`

pub mod classifier;
pub mod config;
pub mod engine;
pub mod errors;
pub mod files;
pub mod orchestrator;
pub mod repair;
pub mod resolver;
pub mod result;
pub mod sandbox;
pub mod state;

pub use config::{ConfigLoader, EngineBuilder, EngineConfig};
pub use engine::{HealOptions, HealOutcome, HealingEngine};
pub use errors::{EngineError, RepairError, SandboxError};
pub use files::FileSet;
pub use orchestrator::ExecutionOrchestrator;
pub use repair::{CommandRepair, RepairCapability, RepairRequest, SelfHealingLoop};
pub use resolver::{DependencyResolver, EntryPointResolver, TechStack};
pub use result::{ExecutionResult, FailureKind};
pub use sandbox::{DockerSandbox, Language, ProcessSandbox, SandboxLimits, SandboxRunner};
pub use state::{ExecutionState, FileStatus};

#[cfg(test)]
pub mod test_utils;
