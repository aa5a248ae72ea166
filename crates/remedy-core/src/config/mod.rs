//! Engine configuration
//!
//! YAML documents are parsed into [`EngineConfig`], environment references
//! are resolved and the result is validated before anything is built.

pub mod builder;
pub mod loader;
pub mod types;

pub use builder::EngineBuilder;
pub use loader::ConfigLoader;
pub use types::*;


use crate::errors::EngineError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, EngineError> {
    ConfigLoader::from_file(path).await
}
