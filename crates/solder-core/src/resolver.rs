//! Cross-reference reconciliation after renumbering
//!
//! Every file is renumbered before this runs, but the links between files
//! still carry ids from each file's private compilation. For each merged unit,
//! in merge order, the resolver:
//!
//! 1. points import directives at the merged unit they import, and
//!    re-exported names at their merged declarations,
//! 2. points inheritance specifiers at the merged base contract,
//! 3. maps override links (`baseFunctions`, `baseModifiers`) to the merged
//!    base declarations, matching by source span since content is identical
//!    across compilations while ids are not,
//! 4. rebuilds `contractDependencies`, `linearizedBaseContracts` and the
//!    contract's exported symbol.
//!
//! Lookups run against immutable state and produce a list of edits, which
//! are applied once the unit has been fully planned.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::ast::{
    self, node_id, node_name, node_src, node_type, parameter_signature, Located, NodeId,
    SourceUnit,
};
use crate::diagnostics::{ReferenceKind, UnresolvedReference};
use crate::error::{CoreError, Result};
use crate::loader::{strip_root, CompilationGroup, LoadedSources};
use crate::merge::MergedSources;

/// What to do with a reference that cannot be matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnresolvedPolicy {
    /// Leave the field at its pre-merge value without a word
    Skip,
    /// Leave the field at its pre-merge value and log a warning
    #[default]
    Warn,
    /// Abort the merge
    Error,
}

/// Override fields per declaration kind
const OVERRIDE_LINKS: [(&str, &str); 2] = [
    (node_type::FUNCTION_DEFINITION, "baseFunctions"),
    (node_type::MODIFIER_DEFINITION, "baseModifiers"),
];

/// One planned field assignment: `node[field] = value`
#[derive(Debug, Clone, PartialEq)]
struct Edit {
    node: String,
    field: String,
    value: Value,
}

impl Edit {
    fn new(node: impl Into<String>, field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            node: node.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    fn apply(self, tree: &mut Value) -> bool {
        match tree.pointer_mut(&self.node).and_then(Value::as_object_mut) {
            Some(node) => {
                node.insert(self.field, self.value);
                true
            }
            None => false,
        }
    }
}

/// A resolved override: the merged base declaration and the contract holding it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OverrideTarget {
    id: NodeId,
    contract: Option<NodeId>,
}

pub struct Resolver {
    root: String,
    policy: UnresolvedPolicy,
    unresolved: Vec<UnresolvedReference>,
}

impl Resolver {
    pub fn new(root: impl Into<String>, policy: UnresolvedPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
            unresolved: Vec::new(),
        }
    }

    pub fn into_unresolved(self) -> Vec<UnresolvedReference> {
        self.unresolved
    }

    /// Resolve every merged unit in merge order
    pub fn resolve_all(&mut self, merged: &mut MergedSources, loaded: &LoadedSources) -> Result<()> {
        for position in 0..merged.len() {
            self.resolve_unit(merged, position, loaded)?;
        }
        Ok(())
    }

    /// Resolve the unit at `position` against the units merged so far
    #[instrument(skip(self, merged, loaded), level = "debug")]
    pub fn resolve_unit(
        &mut self,
        merged: &mut MergedSources,
        position: usize,
        loaded: &LoadedSources,
    ) -> Result<()> {
        let Some(unit) = merged.unit(position) else {
            return Ok(());
        };
        let group = loaded.group(unit.absolute_path());

        let mut edits = self.plan_imports(unit, merged)?;
        if let Some(group) = group {
            edits.extend(plan_reexports(unit, group, merged));
            edits.extend(self.plan_inheritance(unit, group, merged)?);
            edits.extend(self.plan_contracts(unit, group, merged)?);
        } else {
            debug!(
                "No compilation group for {}, only imports resolved",
                unit.absolute_path()
            );
        }

        let planned = edits.len();
        if let Some(unit) = merged.unit_mut(position) {
            let mut applied = 0;
            for edit in edits {
                if edit.apply(unit.tree_mut()) {
                    applied += 1;
                }
            }
            debug!(
                path = unit.absolute_path(),
                planned, applied, "resolved cross references"
            );
        }
        Ok(())
    }

    fn plan_imports(&mut self, unit: &SourceUnit, merged: &MergedSources) -> Result<Vec<Edit>> {
        let mut edits = Vec::new();
        for import in ast::find_all(unit.tree(), node_type::IMPORT_DIRECTIVE) {
            let Some(target) = import.node.get("absolutePath").and_then(Value::as_str) else {
                continue;
            };
            let target = strip_root(target, &self.root);

            match merged.get(target).and_then(SourceUnit::id) {
                Some(id) => edits.push(Edit::new(import.pointer, "sourceUnit", id)),
                None => self.report(
                    ReferenceKind::Import,
                    unit,
                    format!("{} is not part of the merge", target),
                )?,
            }
        }
        Ok(edits)
    }

    fn plan_inheritance(
        &mut self,
        unit: &SourceUnit,
        group: &CompilationGroup,
        merged: &MergedSources,
    ) -> Result<Vec<Edit>> {
        let mut edits = Vec::new();
        for specifier in ast::find_all(unit.tree(), node_type::INHERITANCE_SPECIFIER) {
            let base = &specifier.node["baseName"];
            let is_named = ast::is_node_type(base, node_type::USER_DEFINED_TYPE_NAME)
                || ast::is_node_type(base, node_type::IDENTIFIER_PATH);
            if !is_named {
                continue;
            }
            let Some(name) = base_name(base) else {
                continue;
            };

            let Some(resolved) = resolve_name(group, merged, name) else {
                self.report(
                    ReferenceKind::Inheritance,
                    unit,
                    format!("base {} not found in merged sources", name),
                )?;
                continue;
            };

            let base_pointer = format!("{}/baseName", specifier.pointer);
            let previous = base.get("referencedDeclaration").and_then(Value::as_i64);
            edits.push(Edit::new(
                base_pointer.clone(),
                "referencedDeclaration",
                resolved,
            ));
            if base.get("pathNode").is_some_and(Value::is_object) {
                edits.push(Edit::new(
                    format!("{}/pathNode", base_pointer),
                    "referencedDeclaration",
                    resolved,
                ));
            }
            if let Some(identifier) = base
                .pointer("/typeDescriptions/typeIdentifier")
                .and_then(Value::as_str)
            {
                edits.push(Edit::new(
                    format!("{}/typeDescriptions", base_pointer),
                    "typeIdentifier",
                    splice_type_identifier(identifier, previous, resolved),
                ));
            }
        }
        Ok(edits)
    }

    fn plan_contracts(
        &mut self,
        unit: &SourceUnit,
        group: &CompilationGroup,
        merged: &MergedSources,
    ) -> Result<Vec<Edit>> {
        let mut edits = Vec::new();
        for contract in ast::find_all(unit.tree(), node_type::CONTRACT_DEFINITION) {
            let Some(own_id) = node_id(contract.node) else {
                continue;
            };
            if let Some(name) = node_name(contract.node) {
                if unit.exported_symbols().is_some() {
                    edits.push(Edit::new("/exportedSymbols", name, vec![own_id]));
                }
            }

            let dependencies = ast::id_list(contract.node, "contractDependencies");
            if dependencies.is_empty() {
                edits.push(Edit::new(
                    contract.pointer.clone(),
                    "linearizedBaseContracts",
                    vec![own_id],
                ));
                continue;
            }

            let mut parents = Vec::new();
            for &dependency in &dependencies {
                match resolve_dependency(group, merged, dependency) {
                    Some(id) => parents.push(id),
                    None => self.report(
                        ReferenceKind::Dependency,
                        unit,
                        format!(
                            "{} depends on #{} which has no merged counterpart",
                            node_name(contract.node).unwrap_or("<anonymous>"),
                            dependency
                        ),
                    )?,
                }
            }

            for (kind, field) in OVERRIDE_LINKS {
                for declaration in ast::find_all(contract.node, kind) {
                    let bases = ast::id_list(declaration.node, field);
                    if bases.is_empty() {
                        continue;
                    }

                    let mut resolved_bases = Vec::with_capacity(bases.len());
                    for base in bases {
                        match resolve_override(group, merged, &dependencies, kind, base) {
                            Some(target) => {
                                resolved_bases.push(target.id);
                                parents.extend(target.contract);
                            }
                            None => {
                                resolved_bases.push(base);
                                self.report(
                                    ReferenceKind::Override,
                                    unit,
                                    format!(
                                        "{} {} overrides #{} which was not found in its dependencies",
                                        kind,
                                        node_name(declaration.node).unwrap_or("<unnamed>"),
                                        base
                                    ),
                                )?;
                            }
                        }
                    }
                    edits.push(Edit::new(
                        format!("{}{}", contract.pointer, declaration.pointer),
                        field,
                        resolved_bases,
                    ));
                }
            }

            let parents = dedup_in_order(parents);
            let mut linearized = Vec::with_capacity(parents.len() + 1);
            linearized.push(own_id);
            linearized.extend(parents.iter().copied().filter(|&id| id != own_id));

            edits.push(Edit::new(
                contract.pointer.clone(),
                "contractDependencies",
                parents,
            ));
            edits.push(Edit::new(
                contract.pointer,
                "linearizedBaseContracts",
                linearized,
            ));
        }
        Ok(edits)
    }

    fn report(&mut self, kind: ReferenceKind, unit: &SourceUnit, detail: String) -> Result<()> {
        let path = unit.absolute_path().to_string();
        match self.policy {
            UnresolvedPolicy::Skip => {}
            UnresolvedPolicy::Warn => warn!("Unresolved {} reference in {}: {}", kind, path, detail),
            UnresolvedPolicy::Error => {
                return Err(CoreError::Unresolved {
                    kind: kind.to_string(),
                    path,
                    detail,
                })
            }
        }
        self.unresolved.push(UnresolvedReference { kind, path, detail });
        Ok(())
    }
}

/// Names a unit exports without declaring them, pointed at their merged declarations
fn plan_reexports(unit: &SourceUnit, group: &CompilationGroup, merged: &MergedSources) -> Vec<Edit> {
    let Some(symbols) = unit.exported_symbols() else {
        return Vec::new();
    };
    symbols
        .keys()
        .filter(|name| unit.declaration(name).is_none())
        .filter_map(|name| {
            let id = resolve_name(group, merged, name)?;
            Some(Edit::new("/exportedSymbols", name.as_str(), vec![id]))
        })
        .collect()
}

/// Name of an inheritance base, from either base-name shape the compiler emits
fn base_name(base: &Value) -> Option<&str> {
    node_name(base).or_else(|| base.pointer("/pathNode/name").and_then(Value::as_str))
}

/// Final id of the declaration `name` refers to in this compilation group
fn resolve_name(group: &CompilationGroup, merged: &MergedSources, name: &str) -> Option<NodeId> {
    let original = group.unit_for_name(name)?;
    let target = merged.get(original.absolute_path())?;
    target
        .exported_id(name)
        .or_else(|| target.declaration(name).and_then(node_id))
}

/// Final id of a contract listed (with its original id) in `contractDependencies`
fn resolve_dependency(
    group: &CompilationGroup,
    merged: &MergedSources,
    dependency: NodeId,
) -> Option<NodeId> {
    let (original_unit, original_contract) = group.contract_by_id(dependency)?;
    let name = node_name(original_contract)?;
    let target = merged.get(original_unit.absolute_path())?;
    target
        .declaration(name)
        .and_then(node_id)
        .or_else(|| target.exported_id(name))
}

/// Find the merged declaration an override link points at.
///
/// The original base is looked up by id in the original tree of each
/// dependency; its merged counterpart is the declaration with the same source
/// span, or failing that the same name and parameter types inside a contract
/// of the same name.
fn resolve_override(
    group: &CompilationGroup,
    merged: &MergedSources,
    dependencies: &[NodeId],
    kind: &str,
    base: NodeId,
) -> Option<OverrideTarget> {
    for &dependency in dependencies {
        let Some((original_unit, _)) = group.contract_by_id(dependency) else {
            continue;
        };
        let Some(original) = ast::find_all(original_unit.tree(), kind)
            .into_iter()
            .find(|candidate| node_id(candidate.node) == Some(base))
        else {
            continue;
        };
        let Some(target) = merged.get(original_unit.absolute_path()) else {
            continue;
        };

        let original_contract =
            ast::enclosing_contract(original_unit.tree(), &original.pointer).and_then(node_name);
        let Some(matched) = find_counterpart(target, kind, &original, original_contract) else {
            continue;
        };
        let Some(id) = node_id(matched.node) else {
            continue;
        };

        let contract = ast::enclosing_contract(target.tree(), &matched.pointer).and_then(node_id);
        return Some(OverrideTarget { id, contract });
    }
    None
}

fn find_counterpart<'a>(
    target: &'a SourceUnit,
    kind: &str,
    original: &Located<'_>,
    original_contract: Option<&str>,
) -> Option<Located<'a>> {
    let candidates = ast::find_all(target.tree(), kind);
    let original_name = node_name(original.node);

    if let Some(span) = node_src(original.node) {
        let by_span = candidates.iter().find(|candidate| {
            let same_span = node_src(candidate.node).is_some_and(|src| src.same_span(&span));
            let names_agree = match (node_name(candidate.node), original_name) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            };
            same_span && names_agree
        });
        if let Some(found) = by_span {
            return Some(found.clone());
        }
    }

    let name = original_name.filter(|name| !name.is_empty())?;
    let signature = parameter_signature(original.node);
    candidates.into_iter().find(|candidate| {
        node_name(candidate.node) == Some(name)
            && parameter_signature(candidate.node) == signature
            && ast::enclosing_contract(target.tree(), &candidate.pointer).and_then(node_name)
                == original_contract
    })
}

fn dedup_in_order(ids: Vec<NodeId>) -> Vec<NodeId> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Replace the id inside a `$`-delimited type identifier.
///
/// `t_contract$_Base_$12` with previous id 12 and new id 40 becomes
/// `t_contract$_Base_$40`; nested forms such as `t_type$_t_contract$_Base_$12_$`
/// keep their trailing structure. Without a matching previous id the last
/// `$<digits>` run is replaced; without any the id is appended.
pub fn splice_type_identifier(identifier: &str, previous: Option<NodeId>, id: NodeId) -> String {
    let bytes = identifier.as_bytes();
    let mut runs = Vec::new();
    for (dollar, _) in identifier.match_indices('$') {
        let start = dollar + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end > start {
            runs.push((start, end));
        }
    }

    let slot = previous
        .and_then(|previous| {
            let previous = previous.to_string();
            runs.iter()
                .find(|&&(start, end)| identifier[start..end] == previous)
                .copied()
        })
        .or_else(|| runs.last().copied());

    match slot {
        Some((start, end)) => format!("{}{}{}", &identifier[..start], id, &identifier[end..]),
        None => format!("{}${}", identifier, id),
    }
}
