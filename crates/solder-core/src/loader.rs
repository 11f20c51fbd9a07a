//! Loading per-file syntax trees from the compiler's output directory

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ast::{self, file_stem, node_type, NodeId, SourceUnit};
use crate::error::{CoreError, Result};

/// Suffix of the syntax-tree documents the loader picks up
pub const AST_SUFFIX: &str = ".ast.json";

/// Every unit produced by compiling one source file: the file itself plus
/// everything it imports, all numbered in that compilation's private id space.
#[derive(Debug, Clone)]
pub struct CompilationGroup {
    /// Where the group was read from (used to pick the main unit)
    pub ast_path: PathBuf,
    pub units: Vec<SourceUnit>,
}

impl CompilationGroup {
    pub fn new(ast_path: impl Into<PathBuf>, units: Vec<SourceUnit>) -> Self {
        Self {
            ast_path: ast_path.into(),
            units,
        }
    }

    /// The unit the group was compiled for, matched by file name
    pub fn main_unit(&self) -> Option<&SourceUnit> {
        let stem = self
            .ast_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(file_stem)?;
        self.units
            .iter()
            .find(|unit| file_stem(unit.absolute_path()) == stem)
    }

    /// The unit that declares `name` at top level, or failing that the first
    /// unit that exports it.
    pub fn unit_for_name(&self, name: &str) -> Option<&SourceUnit> {
        self.units
            .iter()
            .find(|unit| unit.exports(name) && unit.declaration(name).is_some())
            .or_else(|| self.units.iter().find(|unit| unit.exports(name)))
    }

    /// The unit containing the contract-like declaration with this id, and the declaration
    pub fn contract_by_id(&self, id: NodeId) -> Option<(&SourceUnit, &Value)> {
        self.units.iter().find_map(|unit| {
            ast::find_by_id(unit.tree(), node_type::CONTRACT_DEFINITION, id)
                .map(|contract| (unit, contract))
        })
    }
}

/// Main units in load order plus the pristine compilation group of each
#[derive(Debug, Clone, Default)]
pub struct LoadedSources {
    pub main_units: Vec<SourceUnit>,
    pub groups: HashMap<String, CompilationGroup>,
}

impl LoadedSources {
    /// Pick the main unit of every group. Groups without one are skipped, and
    /// a path that was already loaded keeps its first group.
    pub fn from_groups(groups: Vec<CompilationGroup>) -> Self {
        let mut loaded = LoadedSources::default();
        for group in groups {
            let Some(main) = group.main_unit().cloned() else {
                debug!("No main source unit in {:?}, skipping", group.ast_path);
                continue;
            };
            let path = main.absolute_path().to_string();
            if loaded.groups.contains_key(&path) {
                warn!("Duplicate syntax tree for {}, keeping the first", path);
                continue;
            }
            loaded.main_units.push(main);
            loaded.groups.insert(path, group);
        }
        loaded
    }

    pub fn len(&self) -> usize {
        self.main_units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.main_units.is_empty()
    }

    pub fn group(&self, path: &str) -> Option<&CompilationGroup> {
        self.groups.get(path)
    }
}

/// Strip the project root from a compiler path: `/work/proj/contracts/A.sol` -> `contracts/A.sol`
pub fn strip_root<'a>(path: &'a str, root: &str) -> &'a str {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return path;
    }
    match path.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => path,
    }
}

/// Parse one syntax-tree document. A bare tree is treated as a one-element list.
pub fn parse_group(ast_path: &Path, content: &str, root: &str) -> Result<CompilationGroup> {
    let document: Value = serde_json::from_str(content)?;
    let trees = match document {
        Value::Array(trees) => trees,
        tree => vec![tree],
    };

    let units = trees
        .into_iter()
        .map(|tree| {
            let mut unit = SourceUnit::from_value(tree)?;
            let normalized = strip_root(unit.absolute_path(), root).to_string();
            unit.set_absolute_path(normalized);
            Ok(unit)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CompilationGroup::new(ast_path, units))
}

/// Sorted list of syntax-tree documents in `ast_dir`
pub fn list_ast_files(ast_dir: &Path) -> Result<Vec<PathBuf>> {
    if !ast_dir.is_dir() {
        return Err(CoreError::MissingArtifact(ast_dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(ast_dir)? {
        let path = entry?.path();
        let is_ast = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(AST_SUFFIX));
        if is_ast && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load every syntax-tree document in `ast_dir`, normalizing paths against `root`
pub fn load_sources(ast_dir: &Path, root: &str) -> Result<LoadedSources> {
    let files = list_ast_files(ast_dir)?;
    let mut groups = Vec::with_capacity(files.len());

    for file in files {
        let content = fs::read_to_string(&file)
            .map_err(|_| CoreError::MissingArtifact(file.clone()))?;
        groups.push(parse_group(&file, &content, root)?);
    }

    let loaded = LoadedSources::from_groups(groups);
    info!(
        "Loaded {} source units from {}",
        loaded.len(),
        ast_dir.display()
    );
    Ok(loaded)
}
