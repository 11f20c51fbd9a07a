//! Merge independently compiled contract syntax trees into one
//! cross-referenced collection for documentation generation

pub mod ast;
pub mod compiler;
pub mod config;
pub mod dependency_graph;
pub mod diagnostics;
pub mod error;
pub mod loader;
pub mod merge;
pub mod renumber;
pub mod resolver;

pub use ast::{NodeId, SourceUnit, SrcLocation};
pub use compiler::{compile_project, AstCompiler, CommandCompiler};
pub use config::MergeConfig;
pub use dependency_graph::{DependencyGraph, OrderStrategy};
pub use diagnostics::MergeDiagnostics;
pub use error::{CoreError, Result};
pub use loader::{load_sources, LoadedSources};
pub use merge::{make_build, merge_sources, Build, MergeOptions, MergeOutcome, MergedSources};
pub use resolver::UnresolvedPolicy;
