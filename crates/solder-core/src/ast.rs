//! Typed helpers over compact-JSON syntax trees
//!
//! Trees are kept as [`serde_json::Value`] so that every field the compiler
//! emits survives the merge untouched. The helpers here give names to the
//! handful of fields the merge actually reads or rewrites.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Node identifier as emitted by the compiler (and re-assigned by the merge)
pub type NodeId = i64;

/// `nodeType` values the merge cares about
pub mod node_type {
    pub const SOURCE_UNIT: &str = "SourceUnit";
    pub const CONTRACT_DEFINITION: &str = "ContractDefinition";
    pub const FUNCTION_DEFINITION: &str = "FunctionDefinition";
    pub const MODIFIER_DEFINITION: &str = "ModifierDefinition";
    pub const IMPORT_DIRECTIVE: &str = "ImportDirective";
    pub const INHERITANCE_SPECIFIER: &str = "InheritanceSpecifier";
    pub const USER_DEFINED_TYPE_NAME: &str = "UserDefinedTypeName";
    pub const IDENTIFIER_PATH: &str = "IdentifierPath";
}

/// A `src` location: `offset:length:fileIndex`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SrcLocation {
    /// `-1` together with length and file index marks an absent location,
    /// e.g. the `nameLocation` of an import without an alias
    pub offset: i64,
    pub length: i64,
    /// The compiler uses `-1` for locations outside any source
    pub file_index: i64,
}

impl SrcLocation {
    pub fn new(offset: i64, length: i64, file_index: i64) -> Self {
        Self {
            offset,
            length,
            file_index,
        }
    }

    /// Compare offset and length only. The file index differs between a
    /// per-file compilation and the merged output.
    pub fn same_span(&self, other: &SrcLocation) -> bool {
        !self.is_unset() && self.offset == other.offset && self.length == other.length
    }

    /// No position in any source, as in `-1:-1:-1`
    pub fn is_unset(&self) -> bool {
        self.offset < 0
    }

    pub fn with_file_index(self, file_index: i64) -> Self {
        Self { file_index, ..self }
    }
}

impl FromStr for SrcLocation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || CoreError::MalformedSrc(s.to_string());
        let mut parts = s.split(':');
        let offset = parts.next().ok_or_else(malformed)?;
        let length = parts.next().ok_or_else(malformed)?;
        let file_index = parts.next().ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }

        Ok(Self {
            offset: offset.parse().map_err(|_| malformed())?,
            length: length.parse().map_err(|_| malformed())?,
            file_index: file_index.parse().map_err(|_| malformed())?,
        })
    }
}

impl fmt::Display for SrcLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.offset, self.length, self.file_index)
    }
}

pub fn node_type(node: &Value) -> Option<&str> {
    node.get("nodeType").and_then(Value::as_str)
}

pub fn is_node_type(node: &Value, kind: &str) -> bool {
    node_type(node) == Some(kind)
}

pub fn node_id(node: &Value) -> Option<NodeId> {
    node.get("id").and_then(Value::as_i64)
}

pub fn node_name(node: &Value) -> Option<&str> {
    node.get("name").and_then(Value::as_str)
}

pub fn node_src(node: &Value) -> Option<SrcLocation> {
    node.get("src")
        .and_then(Value::as_str)
        .and_then(|src| src.parse().ok())
}

/// Read a list of ids such as `contractDependencies` or `baseFunctions`
pub fn id_list(node: &Value, field: &str) -> Vec<NodeId> {
    node.get(field)
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
        .unwrap_or_default()
}

/// Parameter type strings of a function-like node, used as a structural
/// fingerprint when source spans cannot be matched.
pub fn parameter_signature(node: &Value) -> Vec<String> {
    node.pointer("/parameters/parameters")
        .and_then(Value::as_array)
        .map(|params| {
            params
                .iter()
                .map(|param| {
                    param
                        .pointer("/typeDescriptions/typeString")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// File name without directories or extensions: `contracts/token/ERC20.sol` -> `ERC20`
pub fn file_stem(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.split('.').next().unwrap_or(file)
}

/// A node reached during a walk, with its JSON pointer relative to the walk root
#[derive(Debug, Clone)]
pub struct Located<'a> {
    pub pointer: String,
    pub node: &'a Value,
}

/// Every node of the given `nodeType`, in document order
pub fn find_all<'a>(root: &'a Value, kind: &str) -> Vec<Located<'a>> {
    let mut found = Vec::new();
    collect(root, String::new(), kind, &mut found);
    found
}

fn collect<'a>(value: &'a Value, pointer: String, kind: &str, found: &mut Vec<Located<'a>>) {
    match value {
        Value::Object(map) => {
            if is_node_type(value, kind) {
                found.push(Located {
                    pointer: pointer.clone(),
                    node: value,
                });
            }
            for (key, child) in map {
                collect(
                    child,
                    format!("{}/{}", pointer, escape_pointer_token(key)),
                    kind,
                    found,
                );
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                collect(child, format!("{}/{}", pointer, index), kind, found);
            }
        }
        _ => {}
    }
}

pub fn find_by_id<'a>(root: &'a Value, kind: &str, id: NodeId) -> Option<&'a Value> {
    find_all(root, kind)
        .into_iter()
        .map(|located| located.node)
        .find(|node| node_id(node) == Some(id))
}

/// Closest `ContractDefinition` containing the node at `pointer`, if any
pub fn enclosing_contract<'a>(root: &'a Value, pointer: &str) -> Option<&'a Value> {
    let mut prefix = pointer;
    while let Some(cut) = prefix.rfind('/') {
        prefix = &prefix[..cut];
        if let Some(candidate) = root.pointer(prefix) {
            if is_node_type(candidate, node_type::CONTRACT_DEFINITION) {
                return Some(candidate);
            }
        }
    }
    None
}

pub fn escape_pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Root of one compiled source file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SourceUnit {
    tree: Value,
}

impl SourceUnit {
    pub fn from_value(tree: Value) -> Result<Self> {
        if !is_node_type(&tree, node_type::SOURCE_UNIT) {
            return Err(CoreError::InvalidTree(format!(
                "expected a {} root, found {:?}",
                node_type::SOURCE_UNIT,
                node_type(&tree)
            )));
        }
        if tree.get("absolutePath").and_then(Value::as_str).is_none() {
            return Err(CoreError::InvalidTree(
                "source unit without absolutePath".to_string(),
            ));
        }
        Ok(Self { tree })
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Value {
        &mut self.tree
    }

    pub fn absolute_path(&self) -> &str {
        self.tree
            .get("absolutePath")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn set_absolute_path(&mut self, path: impl Into<String>) {
        if let Some(map) = self.tree.as_object_mut() {
            map.insert("absolutePath".to_string(), Value::String(path.into()));
        }
    }

    pub fn id(&self) -> Option<NodeId> {
        node_id(&self.tree)
    }

    pub fn exported_symbols(&self) -> Option<&Map<String, Value>> {
        self.tree.get("exportedSymbols").and_then(Value::as_object)
    }

    pub fn exports(&self, name: &str) -> bool {
        self.exported_symbols()
            .is_some_and(|symbols| symbols.contains_key(name))
    }

    /// First id an exported name resolves to
    pub fn exported_id(&self, name: &str) -> Option<NodeId> {
        self.exported_symbols()?
            .get(name)?
            .as_array()?
            .first()?
            .as_i64()
    }

    pub fn set_exported(&mut self, name: &str, id: NodeId) {
        if let Some(symbols) = self
            .tree
            .get_mut("exportedSymbols")
            .and_then(Value::as_object_mut)
        {
            symbols.insert(name.to_string(), Value::from(vec![id]));
        }
    }

    pub fn top_level_nodes(&self) -> &[Value] {
        self.tree
            .get("nodes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Top-level declaration with the given name
    pub fn declaration(&self, name: &str) -> Option<&Value> {
        self.top_level_nodes()
            .iter()
            .find(|node| node_name(node) == Some(name))
    }

    /// The contract-like declaration the file is named after, or the first one
    pub fn root_contract(&self) -> Option<&Value> {
        let stem = file_stem(self.absolute_path());
        let mut contracts = self
            .top_level_nodes()
            .iter()
            .filter(|node| is_node_type(node, node_type::CONTRACT_DEFINITION));
        let first = contracts.next()?;
        if node_name(first) == Some(stem) {
            return Some(first);
        }
        contracts
            .find(|node| node_name(node) == Some(stem))
            .or(Some(first))
    }

    /// Direct dependency count of the root contract-like declaration
    pub fn dependency_count(&self) -> usize {
        self.root_contract()
            .map(|contract| id_list(contract, "contractDependencies").len())
            .unwrap_or(0)
    }
}

impl TryFrom<Value> for SourceUnit {
    type Error = CoreError;

    fn try_from(tree: Value) -> Result<Self> {
        Self::from_value(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_src_location_parse_and_display() {
        let src: SrcLocation = "120:45:3".parse().unwrap();
        assert_eq!(src, SrcLocation::new(120, 45, 3));
        assert_eq!(src.to_string(), "120:45:3");
        assert_eq!(src.with_file_index(0).to_string(), "120:45:0");
    }

    #[test]
    fn test_src_location_rejects_malformed() {
        assert!("120:45".parse::<SrcLocation>().is_err());
        assert!("a:1:2".parse::<SrcLocation>().is_err());
        assert!("1:2:3:4".parse::<SrcLocation>().is_err());
        assert!("0:0:-1".parse::<SrcLocation>().is_ok());
    }

    #[test]
    fn test_unset_location() {
        let unset: SrcLocation = "-1:-1:-1".parse().unwrap();
        assert!(unset.is_unset());
        assert!(!unset.same_span(&unset));
        assert_eq!(unset.to_string(), "-1:-1:-1");
        assert!(!"0:0:-1".parse::<SrcLocation>().unwrap().is_unset());
    }

    #[test]
    fn test_same_span_ignores_file_index() {
        let a = SrcLocation::new(10, 20, 0);
        let b = SrcLocation::new(10, 20, 7);
        let c = SrcLocation::new(10, 21, 0);
        assert!(a.same_span(&b));
        assert!(!a.same_span(&c));
    }

    #[test]
    fn test_find_all_reports_pointers() {
        let tree = json!({
            "nodeType": "SourceUnit",
            "nodes": [
                {"nodeType": "PragmaDirective", "id": 1},
                {"nodeType": "ContractDefinition", "id": 4, "nodes": [
                    {"nodeType": "FunctionDefinition", "id": 2},
                    {"nodeType": "FunctionDefinition", "id": 3}
                ]}
            ]
        });

        let functions = find_all(&tree, node_type::FUNCTION_DEFINITION);
        let pointers: Vec<_> = functions.iter().map(|f| f.pointer.as_str()).collect();
        assert_eq!(pointers, vec!["/nodes/1/nodes/0", "/nodes/1/nodes/1"]);

        let contract = enclosing_contract(&tree, &functions[1].pointer).unwrap();
        assert_eq!(node_id(contract), Some(4));
        assert!(enclosing_contract(&tree, "/nodes/0").is_none());
    }

    #[test]
    fn test_root_contract_prefers_file_name() {
        let unit = SourceUnit::from_value(json!({
            "nodeType": "SourceUnit",
            "absolutePath": "contracts/Token.sol",
            "exportedSymbols": {"Helper": [1], "Token": [2]},
            "nodes": [
                {"nodeType": "ContractDefinition", "id": 1, "name": "Helper", "contractDependencies": []},
                {"nodeType": "ContractDefinition", "id": 2, "name": "Token", "contractDependencies": [1]}
            ]
        }))
        .unwrap();

        assert_eq!(unit.root_contract().and_then(node_name), Some("Token"));
        assert_eq!(unit.dependency_count(), 1);
        assert_eq!(unit.exported_id("Helper"), Some(1));
        assert!(!unit.exports("Missing"));
    }

    #[test]
    fn test_source_unit_requires_root_kind() {
        assert!(SourceUnit::from_value(json!({"nodeType": "ContractDefinition"})).is_err());
        assert!(SourceUnit::from_value(json!({"nodeType": "SourceUnit"})).is_err());
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("contracts/token/ERC20.sol"), "ERC20");
        assert_eq!(file_stem("/tmp/ast/Wallet.ast.json"), "Wallet");
        assert_eq!(file_stem("Plain"), "Plain");
    }
}
