//! Error types for the execution engine
//!
//! Ordinary execution and repair failures never surface as `Err` from the
//! engine; they are captured into execution results and the aggregate state.
//! The types here cover contract violations at the API boundary, sandbox
//! backend failures (mapped into results by the runner) and repair
//! capability failures (which consume an attempt).

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid file set: {0}")]
    InvalidFileSet(String),
    #[error("Unknown file '{0}': the file set never gains new paths")]
    UnknownFile(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::IoError(err.to_string())
    }
}

// Backend-level failures; the runner turns these into execution results
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Bollard (Docker client) error: {0}")]
    BollardError(#[from] bollard::errors::Error),
    #[error("I/O error during sandbox operation: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Could not prepare sandbox workspace: {0}")]
    WorkspaceError(String),
    #[error("Sandbox backend unavailable: {0}")]
    Unavailable(String),
    #[error("Sandbox execution timed out")]
    Timeout,
}

#[derive(Error, Debug, Clone)]
pub enum RepairError {
    #[error("Repair capability failed: {0}")]
    Failed(String),
    #[error("Repair capability returned no usable code")]
    EmptyResponse,
    #[error("Repair capability timed out")]
    Timeout,
}

impl From<std::io::Error> for RepairError {
    fn from(err: std::io::Error) -> Self {
        RepairError::Failed(err.to_string())
    }
}
