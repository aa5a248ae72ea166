//! Static analysis of the file set ahead of execution: which files to run
//! and which packages they need.

pub mod dependencies;
pub mod entry_points;

pub use dependencies::{DependencyResolver, TechStack};
pub use entry_points::{
    ConventionalName, EntryPointPredicate, EntryPointResolver, MainGuard, SubstringGuard,
};
