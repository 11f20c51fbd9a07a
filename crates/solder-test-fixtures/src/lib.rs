//! Test fixtures for solder
//!
//! Compiler-shaped syntax trees built with `serde_json::json!`, plus a
//! temporary project layout to write them into. Every group mimics one
//! independent compilation: the compiled file together with the files it
//! imports, all numbered in that compilation's private id space.

use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const BASE_PATH: &str = "contracts/A.sol";
pub const DERIVED_PATH: &str = "contracts/B.sol";

pub const BASE_SOURCE: &str = "pragma solidity ^0.8.0;\n\ncontract A {\n    function greet(uint256 times) public virtual {}\n}\n";
pub const DERIVED_SOURCE: &str = "pragma solidity ^0.8.0;\n\nimport \"./A.sol\";\n\ncontract B is A {\n    function greet(uint256 times) public override {}\n}\n";

/// Ids of the base file when numbered from `offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseIds {
    pub function: i64,
    pub contract: i64,
    pub unit: i64,
}

impl BaseIds {
    pub fn at(offset: i64) -> Self {
        Self {
            function: offset + 5,
            contract: offset + 6,
            unit: offset + 7,
        }
    }
}

fn src(offset: u64, length: u64, file_index: i64) -> String {
    format!("{}:{}:{}", offset, length, file_index)
}

/// `contract A { function greet(uint256 times) public virtual {} }`, ids `offset+1 ..= offset+7`
pub fn base_unit(offset: i64, file_index: i64) -> Value {
    json!({
        "nodeType": "SourceUnit",
        "id": offset + 7,
        "absolutePath": BASE_PATH,
        "exportedSymbols": {"A": [offset + 6]},
        "license": "MIT",
        "nodes": [
            {
                "nodeType": "PragmaDirective",
                "id": offset + 1,
                "literals": ["solidity", "^", "0.8", ".0"],
                "src": src(0, 23, file_index)
            },
            {
                "nodeType": "ContractDefinition",
                "id": offset + 6,
                "name": "A",
                "nameLocation": src(34, 1, file_index),
                "abstract": false,
                "baseContracts": [],
                "contractDependencies": [],
                "contractKind": "contract",
                "linearizedBaseContracts": [offset + 6],
                "nodes": [
                    {
                        "nodeType": "FunctionDefinition",
                        "id": offset + 5,
                        "name": "greet",
                        "nameLocation": src(51, 5, file_index),
                        "kind": "function",
                        "parameters": {
                            "nodeType": "ParameterList",
                            "id": offset + 3,
                            "parameters": [
                                {
                                    "nodeType": "VariableDeclaration",
                                    "id": offset + 2,
                                    "name": "times",
                                    "src": src(57, 13, file_index),
                                    "typeDescriptions": {
                                        "typeIdentifier": "t_uint256",
                                        "typeString": "uint256"
                                    }
                                }
                            ],
                            "src": src(56, 15, file_index)
                        },
                        "body": {
                            "nodeType": "Block",
                            "id": offset + 4,
                            "statements": [],
                            "src": src(87, 2, file_index)
                        },
                        "src": src(42, 47, file_index),
                        "virtual": true,
                        "visibility": "public"
                    }
                ],
                "src": src(25, 66, file_index)
            }
        ],
        "src": src(0, 92, file_index)
    })
}

/// `import "./A.sol"; contract B is A { function greet(uint256 times) public override {} }`,
/// ids `offset+1 ..= offset+10`, referring to a base numbered from `base_offset`
pub fn derived_unit(offset: i64, file_index: i64, base_offset: i64) -> Value {
    let base = BaseIds::at(base_offset);
    json!({
        "nodeType": "SourceUnit",
        "id": offset + 10,
        "absolutePath": DERIVED_PATH,
        "exportedSymbols": {"A": [base.contract], "B": [offset + 9]},
        "license": "MIT",
        "nodes": [
            {
                "nodeType": "PragmaDirective",
                "id": offset + 1,
                "literals": ["solidity", "^", "0.8", ".0"],
                "src": src(0, 23, file_index)
            },
            {
                "nodeType": "ImportDirective",
                "id": offset + 2,
                "absolutePath": BASE_PATH,
                "file": "./A.sol",
                "nameLocation": "-1:-1:-1",
                "scope": offset + 10,
                "sourceUnit": base.unit,
                "src": src(25, 18, file_index),
                "symbolAliases": [],
                "unitAlias": ""
            },
            {
                "nodeType": "ContractDefinition",
                "id": offset + 9,
                "name": "B",
                "nameLocation": src(54, 1, file_index),
                "abstract": false,
                "baseContracts": [
                    {
                        "nodeType": "InheritanceSpecifier",
                        "id": offset + 4,
                        "baseName": {
                            "nodeType": "UserDefinedTypeName",
                            "id": offset + 3,
                            "name": "A",
                            "referencedDeclaration": base.contract,
                            "src": src(59, 1, file_index),
                            "typeDescriptions": {
                                "typeIdentifier": format!("t_contract$_A_${}", base.contract),
                                "typeString": "contract A"
                            }
                        },
                        "src": src(59, 1, file_index)
                    }
                ],
                "contractDependencies": [base.contract],
                "contractKind": "contract",
                "linearizedBaseContracts": [offset + 9, base.contract],
                "nodes": [
                    {
                        "nodeType": "FunctionDefinition",
                        "id": offset + 8,
                        "name": "greet",
                        "nameLocation": src(76, 5, file_index),
                        "baseFunctions": [base.function],
                        "kind": "function",
                        "parameters": {
                            "nodeType": "ParameterList",
                            "id": offset + 6,
                            "parameters": [
                                {
                                    "nodeType": "VariableDeclaration",
                                    "id": offset + 5,
                                    "name": "times",
                                    "src": src(82, 13, file_index),
                                    "typeDescriptions": {
                                        "typeIdentifier": "t_uint256",
                                        "typeString": "uint256"
                                    }
                                }
                            ],
                            "src": src(81, 15, file_index)
                        },
                        "body": {
                            "nodeType": "Block",
                            "id": offset + 7,
                            "statements": [],
                            "src": src(113, 2, file_index)
                        },
                        "src": src(67, 48, file_index),
                        "virtual": false,
                        "visibility": "public"
                    }
                ],
                "src": src(45, 72, file_index)
            }
        ],
        "src": src(0, 118, file_index)
    })
}

/// Compilation of `A.sol` on its own
pub fn base_group() -> Value {
    json!([base_unit(0, 0)])
}

/// Compilation of `B.sol`: B numbered first, then the imported A from 10
pub fn derived_group() -> Value {
    json!([derived_unit(0, 0, 10), base_unit(10, 1)])
}

/// A unit declaring one contract that depends on `dependencies` (name, id).
///
/// The contract gets `id`, the unit `id + 1`. Used to build dependency
/// chains where only ordering matters.
pub fn contract_unit(path: &str, name: &str, id: i64, dependencies: &[i64]) -> Value {
    let mut linearized = vec![id];
    linearized.extend_from_slice(dependencies);
    json!({
        "nodeType": "SourceUnit",
        "id": id + 1,
        "absolutePath": path,
        "exportedSymbols": {name: [id]},
        "nodes": [
            {
                "nodeType": "ContractDefinition",
                "id": id,
                "name": name,
                "baseContracts": [],
                "contractDependencies": dependencies,
                "contractKind": "contract",
                "linearizedBaseContracts": linearized,
                "nodes": [],
                "src": src(0, 10, 0)
            }
        ],
        "src": src(0, 10, 0)
    })
}

/// A throwaway project directory: `contracts/` for sources, `ast/` for trees
pub struct TestProject {
    dir: tempfile::TempDir,
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

impl TestProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("contracts")).unwrap();
        fs::create_dir_all(dir.path().join("ast")).unwrap();
        Self { dir }
    }

    /// The base/derived pair with both trees and both sources on disk
    pub fn with_inheritance() -> Self {
        let project = Self::new();
        project.write_ast("A", &base_group());
        project.write_ast("B", &derived_group());
        project.write_source(BASE_PATH, BASE_SOURCE);
        project.write_source(DERIVED_PATH, DERIVED_SOURCE);
        project
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn ast_dir(&self) -> PathBuf {
        self.root().join("ast")
    }

    /// Write `ast/<stem>.ast.json`
    pub fn write_ast(&self, stem: &str, document: &Value) -> PathBuf {
        let path = self.ast_dir().join(format!("{}.ast.json", stem));
        fs::write(&path, serde_json::to_string_pretty(document).unwrap()).unwrap();
        path
    }

    /// Write a source file relative to the project root
    pub fn write_source(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }
}
