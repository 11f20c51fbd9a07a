//! Merge orchestration: order, renumber, rewrite locations, resolve, assemble
//!
//! ```text
//! load -> order -> renumber + rewrite src (per file) -> resolve (per file) -> Build
//! ```
//!
//! The identifier counter and the file index are owned here and threaded
//! through the passes explicitly.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Serialize, Serializer};
use tracing::{info, instrument, warn};

use crate::ast::{NodeId, SourceUnit};
use crate::config::MergeConfig;
use crate::dependency_graph::{DependencyGraph, OrderStrategy};
use crate::diagnostics::{FileDiagnostics, MergeDiagnostics};
use crate::error::{CoreError, Result};
use crate::loader::{load_sources, LoadedSources};
use crate::renumber::{renumber_ids, rewrite_src};
use crate::resolver::{Resolver, UnresolvedPolicy};

/// Merged units in file-index order, addressable by path
#[derive(Debug, Clone, Default)]
pub struct MergedSources {
    units: Vec<SourceUnit>,
    index: HashMap<String, usize>,
}

impl MergedSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit and return its file index
    pub fn push(&mut self, unit: SourceUnit) -> usize {
        let position = self.units.len();
        self.index.insert(unit.absolute_path().to_string(), position);
        self.units.push(unit);
        position
    }

    pub fn get(&self, path: &str) -> Option<&SourceUnit> {
        self.index.get(path).and_then(|&position| self.units.get(position))
    }

    pub fn unit(&self, position: usize) -> Option<&SourceUnit> {
        self.units.get(position)
    }

    pub fn unit_mut(&mut self, position: usize) -> Option<&mut SourceUnit> {
        self.units.get_mut(position)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceUnit> {
        self.units.iter()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.units.iter().map(SourceUnit::absolute_path).collect()
    }

    /// `{ path: { ast, id } }` in file-index order
    pub fn to_output(&self) -> CompilerOutput {
        let mut sources = SourceMap::default();
        for (id, unit) in self.units.iter().enumerate() {
            sources.insert(
                unit.absolute_path(),
                OutputSource {
                    ast: unit.clone(),
                    id,
                },
            );
        }
        CompilerOutput { sources }
    }
}

/// Path-keyed entries serialized as a JSON object in insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMap<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for SourceMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> SourceMap<T> {
    pub fn insert(&mut self, path: impl Into<String>, value: T) {
        let path = path.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == path) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((path, value)),
        }
    }

    pub fn get(&self, path: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == path)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(path, _)| path.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(path, value)| (path.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Serialize> Serialize for SourceMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(path, value)| (path, value)))
    }
}

/// Merged tree of one file with its file index
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSource {
    pub ast: SourceUnit,
    pub id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilerOutput {
    pub sources: SourceMap<OutputSource>,
}

/// Literal text of one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSource {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilerInput {
    pub sources: SourceMap<InputSource>,
}

/// What the documentation pipeline consumes, shaped like a whole-project compilation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Build {
    pub input: CompilerInput,
    pub output: CompilerOutput,
}

/// Knobs of the in-memory merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Prefix stripped from import paths before lookup
    pub root: String,
    pub order: OrderStrategy,
    pub unresolved: UnresolvedPolicy,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub merged: MergedSources,
    pub diagnostics: MergeDiagnostics,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub build: Build,
    pub diagnostics: MergeDiagnostics,
}

/// Merge loaded per-file trees into one consistent collection.
///
/// Every file is renumbered and given its file index before any reference is
/// resolved, so the resolver only ever reads final identifiers.
#[instrument(skip_all, fields(files = loaded.len()))]
pub fn merge_sources(loaded: &LoadedSources, options: &MergeOptions) -> Result<MergeOutcome> {
    let order = DependencyGraph::from_sources(loaded).order(options.order)?;

    let by_path: HashMap<&str, &SourceUnit> = loaded
        .main_units
        .iter()
        .map(|unit| (unit.absolute_path(), unit))
        .collect();

    let mut diagnostics = MergeDiagnostics::new(options.order);
    diagnostics.order = order.clone();

    let mut merged = MergedSources::new();
    let mut counter: NodeId = 0;
    for path in &order {
        let Some(&original) = by_path.get(path.as_str()) else {
            continue;
        };
        let mut unit = original.clone();
        let first_id = counter;
        counter = renumber_ids(&mut unit, counter);

        let file_index = merged.len();
        let locations_rewritten = rewrite_src(unit.tree_mut(), file_index as i64);
        merged.push(unit);

        diagnostics.add_file(FileDiagnostics {
            path: path.clone(),
            file_index,
            first_id,
            next_id: counter,
            locations_rewritten,
        });
    }

    let mut resolver = Resolver::new(options.root.clone(), options.unresolved);
    resolver.resolve_all(&mut merged, loaded)?;
    diagnostics.unresolved = resolver.into_unresolved();

    info!(
        "Merged {} source units, {} ids assigned, {} unresolved references",
        merged.len(),
        counter,
        diagnostics.unresolved.len()
    );
    Ok(MergeOutcome {
        merged,
        diagnostics,
    })
}

/// Load, merge, snapshot and pair every merged tree with its source text
pub fn make_build(config: &MergeConfig) -> Result<BuildReport> {
    config.validate()?;
    let loaded = load_sources(&config.ast_dir(), &config.root_prefix())?;
    let MergeOutcome {
        merged,
        mut diagnostics,
    } = merge_sources(&loaded, &config.merge_options())?;

    let output = merged.to_output();
    let snapshot = config.snapshot_file();
    match write_snapshot(&output, &snapshot) {
        Ok(()) => diagnostics.snapshot = Some(snapshot),
        Err(err) => {
            warn!("Could not write snapshot {}: {}", snapshot.display(), err);
            diagnostics.add_error(format!("snapshot: {}", err));
        }
    }

    let input = read_inputs(&merged, config)?;
    Ok(BuildReport {
        build: Build { input, output },
        diagnostics,
    })
}

/// Persist the merged collection as pretty JSON for inspection
pub fn write_snapshot(output: &CompilerOutput, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&output.sources)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_inputs(merged: &MergedSources, config: &MergeConfig) -> Result<CompilerInput> {
    let mut sources = SourceMap::default();
    for path in merged.paths() {
        let file: PathBuf = config.source_file(path);
        let content =
            fs::read_to_string(&file).map_err(|_| CoreError::MissingArtifact(file.clone()))?;
        sources.insert(path, InputSource { content });
    }
    Ok(CompilerInput { sources })
}
