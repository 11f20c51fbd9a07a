use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Malformed source location '{0}'")]
    MalformedSrc(String),

    #[error("Invalid syntax tree: {0}")]
    InvalidTree(String),

    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    #[error("Unresolved {kind} reference in {path}: {detail}")]
    Unresolved {
        kind: String,
        path: String,
        detail: String,
    },

    #[error("Compiler failed on {source_path}: {message}")]
    CompilerFailed { source_path: String, message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
