//! Diagnostics collected while merging

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ast::NodeId;
use crate::dependency_graph::OrderStrategy;

/// Which kind of cross-file link could not be reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    Import,
    Inheritance,
    Override,
    Dependency,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferenceKind::Import => "import",
            ReferenceKind::Inheritance => "inheritance",
            ReferenceKind::Override => "override",
            ReferenceKind::Dependency => "dependency",
        };
        f.write_str(name)
    }
}

/// A reference left at its pre-merge value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub kind: ReferenceKind,
    /// File the reference appears in
    pub path: String,
    pub detail: String,
}

/// Per-file numbering record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiagnostics {
    pub path: String,
    pub file_index: usize,
    pub first_id: NodeId,
    pub next_id: NodeId,
    pub locations_rewritten: usize,
}

/// Aggregated diagnostics for one merge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeDiagnostics {
    pub generated_at: Option<DateTime<Utc>>,
    pub strategy: OrderStrategy,
    pub order: Vec<String>,
    pub files: Vec<FileDiagnostics>,
    pub unresolved: Vec<UnresolvedReference>,
    pub snapshot: Option<PathBuf>,
    /// Non-fatal failures, such as a snapshot that could not be written
    pub errors: Vec<String>,
}

impl MergeDiagnostics {
    pub fn new(strategy: OrderStrategy) -> Self {
        Self {
            generated_at: Some(Utc::now()),
            strategy,
            ..Self::default()
        }
    }

    pub fn add_file(&mut self, file: FileDiagnostics) {
        self.files.push(file);
    }

    pub fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }

    /// Next free id after the last renumbered file
    pub fn next_id(&self) -> NodeId {
        self.files.last().map(|file| file.next_id).unwrap_or(0)
    }

    pub fn unresolved_of(&self, kind: ReferenceKind) -> impl Iterator<Item = &UnresolvedReference> {
        self.unresolved
            .iter()
            .filter(move |reference| reference.kind == kind)
    }

    /// Export diagnostics to a JSON file
    pub fn export_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
