//! Boundary with the external compiler
//!
//! The compiler is invoked once per source file as a blocking subprocess and
//! leaves one syntax-tree document per compiled unit in an output directory.
//! Those documents are then renamed to `*.ast.json` and wrapped into lists so
//! the loader can read them uniformly.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::config::MergeConfig;
use crate::error::{CoreError, Result};
use crate::loader::{list_ast_files, parse_group, AST_SUFFIX};

/// Source file extensions the compiler accepts
pub const SOURCE_EXTENSIONS: [&str; 2] = ["sol", "tsol"];

/// Suffixes the compiler gives its syntax-tree output
const RAW_AST_SUFFIXES: [&str; 2] = [".sol_json.ast", ".tsol_json.ast"];

/// Produces the syntax tree of one source file
pub trait AstCompiler {
    fn compile(&self, source: &Path, output_dir: &Path) -> Result<()>;
}

/// Runs `<program> --ast-compact-json <source> --output-dir=<dir>`
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: PathBuf,
    working_dir: Option<PathBuf>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn from_config(config: &MergeConfig) -> Self {
        Self::new(&config.compiler_path).current_dir(&config.root)
    }
}

/// Express `path` for a process running in `working_dir`.
///
/// Paths under the working directory become relative to it, so the compiler
/// records root-relative `absolutePath`s. Other relative paths are anchored at
/// our own current directory.
fn path_for_compiler(path: &Path, working_dir: Option<&Path>) -> Result<PathBuf> {
    let Some(dir) = working_dir else {
        return Ok(path.to_path_buf());
    };
    match path.strip_prefix(dir) {
        Ok(relative) if relative.as_os_str().is_empty() => Ok(PathBuf::from(".")),
        Ok(relative) => Ok(relative.to_path_buf()),
        Err(_) if path.is_relative() => Ok(std::env::current_dir()?.join(path)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

impl AstCompiler for CommandCompiler {
    fn compile(&self, source: &Path, output_dir: &Path) -> Result<()> {
        let working_dir = self.working_dir.as_deref();
        let source_arg = path_for_compiler(source, working_dir)?;
        let output_arg = path_for_compiler(output_dir, working_dir)?;

        let mut cmd = Command::new(&self.program);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd.arg("--ast-compact-json")
            .arg(&source_arg)
            .arg(format!("--output-dir={}", output_arg.display()));

        debug!("Running {:?}", cmd);
        let output = cmd.output().map_err(|e| CoreError::CompilerFailed {
            source_path: source.display().to_string(),
            message: format!("could not run {}: {}", self.program.display(), e),
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CoreError::CompilerFailed {
                source_path: source.display().to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Counts reported by [`compile_project`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileSummary {
    pub sources: usize,
    pub external: usize,
    pub artifacts: usize,
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Every source file under `dir`, skipping directories named in `exclude`
pub fn discover_sources(dir: &Path, exclude: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(CoreError::MissingArtifact(dir.to_path_buf()));
    }

    let mut sources: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| exclude.iter().any(|excluded| excluded == name))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_source_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    sources.sort();
    Ok(sources)
}

/// Rename raw compiler output to `*.ast.json` and wrap bare trees into lists.
///
/// Documents that fail to parse are left alone with a warning. Returns the
/// number of `*.ast.json` documents in the directory afterwards.
pub fn normalize_artifacts(dir: &Path) -> Result<usize> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(stem) = RAW_AST_SUFFIXES
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix))
        else {
            continue;
        };
        let renamed = dir.join(format!("{}{}", stem, AST_SUFFIX));
        fs::rename(&path, &renamed)?;
    }

    let files = list_ast_files(dir)?;
    for file in &files {
        let content = fs::read_to_string(file)?;
        let document: Value = match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(err) => {
                warn!("Error parsing {}: {}", file.display(), err);
                continue;
            }
        };
        if !document.is_array() {
            let wrapped = Value::Array(vec![document]);
            fs::write(file, serde_json::to_string_pretty(&wrapped)?)?;
        }
    }
    Ok(files.len())
}

/// Imported units from outside the project's source directory that have no
/// syntax-tree document of their own yet.
fn external_units(config: &MergeConfig, ast_dir: &Path) -> Result<BTreeSet<String>> {
    let root = config.root_prefix();
    let mut external = BTreeSet::new();
    for file in list_ast_files(ast_dir)? {
        let content = fs::read_to_string(&file)?;
        let group = match parse_group(&file, &content, &root) {
            Ok(group) => group,
            Err(err) => {
                warn!("Skipping {} while collecting imports: {}", file.display(), err);
                continue;
            }
        };
        for unit in group.units {
            let path = unit.absolute_path();
            if config.is_project_source(path) {
                continue;
            }
            let stem = crate::ast::file_stem(path);
            if ast_dir.join(format!("{}{}", stem, AST_SUFFIX)).exists() {
                continue;
            }
            external.insert(path.to_string());
        }
    }
    Ok(external)
}

/// Compile the whole project into the configured AST directory.
///
/// The directory is recreated from scratch. Project sources are compiled
/// first; the third-party units they import are compiled afterwards so that
/// each of them gets a syntax tree of its own. Any compiler failure aborts.
#[instrument(skip_all, fields(root = %config.root.display()))]
pub fn compile_project(config: &MergeConfig, compiler: &dyn AstCompiler) -> Result<CompileSummary> {
    config.validate()?;
    let ast_dir = config.ast_dir();
    if ast_dir.exists() {
        fs::remove_dir_all(&ast_dir)?;
    }
    fs::create_dir_all(&ast_dir)?;

    let sources = discover_sources(&config.sources_path(), &config.exclude)?;
    for source in &sources {
        debug!("Compiling {}", source.display());
        compiler.compile(source, &ast_dir)?;
    }
    normalize_artifacts(&ast_dir)?;

    let external = external_units(config, &ast_dir)?;
    for path in &external {
        let source = config.source_file(path);
        debug!("Compiling external {}", source.display());
        compiler.compile(&source, &ast_dir)?;
    }
    let artifacts = normalize_artifacts(&ast_dir)?;

    let summary = CompileSummary {
        sources: sources.len(),
        external: external.len(),
        artifacts,
    };
    info!(
        "Compiled {} sources and {} external units into {} ({} syntax trees)",
        summary.sources,
        summary.external,
        ast_dir.display(),
        summary.artifacts
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Writes a minimal tree per call, importing whatever `imports` lists
    struct FakeCompiler {
        imports: Vec<String>,
        calls: RefCell<Vec<PathBuf>>,
    }

    impl FakeCompiler {
        fn new(imports: &[&str]) -> Self {
            Self {
                imports: imports.iter().map(|path| path.to_string()).collect(),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn unit(path: &str) -> Value {
            serde_json::json!({
                "nodeType": "SourceUnit",
                "id": 1,
                "absolutePath": path,
                "exportedSymbols": {},
                "nodes": []
            })
        }
    }

    impl AstCompiler for FakeCompiler {
        fn compile(&self, source: &Path, output_dir: &Path) -> Result<()> {
            self.calls.borrow_mut().push(source.to_path_buf());
            let name = source.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let stem = crate::ast::file_stem(name);
            let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("sol");

            let mut units = if source.to_string_lossy().contains("node_modules") {
                vec![Self::unit(&self.imports[0])]
            } else {
                std::iter::once(format!("contracts/{}", name))
                    .chain(self.imports.iter().cloned())
                    .map(|path| Self::unit(&path))
                    .collect()
            };
            let document = if units.len() == 1 {
                units.remove(0)
            } else {
                Value::Array(units)
            };
            fs::write(
                output_dir.join(format!("{}.{}_json.ast", stem, ext)),
                document.to_string(),
            )?;
            Ok(())
        }
    }

    struct FailingCompiler;

    impl AstCompiler for FailingCompiler {
        fn compile(&self, source: &Path, _output_dir: &Path) -> Result<()> {
            Err(CoreError::CompilerFailed {
                source_path: source.display().to_string(),
                message: "ParserError".to_string(),
            })
        }
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let contracts = dir.path().join("contracts");
        fs::create_dir_all(contracts.join("mocks")).unwrap();
        fs::write(contracts.join("Token.sol"), "contract Token {}").unwrap();
        fs::write(contracts.join("Wallet.tsol"), "contract Wallet {}").unwrap();
        fs::write(contracts.join("README.md"), "docs").unwrap();
        fs::write(contracts.join("mocks").join("Mock.sol"), "contract Mock {}").unwrap();
        dir
    }

    #[test]
    fn test_discover_sources_skips_excluded() {
        let dir = project();
        let sources = discover_sources(&dir.path().join("contracts"), &["mocks".to_string()]).unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Token.sol", "Wallet.tsol"]);

        let all = discover_sources(&dir.path().join("contracts"), &[]).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_normalize_artifacts_renames_and_wraps() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("A.sol_json.ast"),
            FakeCompiler::unit("contracts/A.sol").to_string(),
        )
        .unwrap();
        fs::write(dir.path().join("B.tsol_json.ast"), "[]").unwrap();
        fs::write(dir.path().join("Broken.sol_json.ast"), "{not json").unwrap();

        assert_eq!(normalize_artifacts(dir.path()).unwrap(), 3);

        let a: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("A.ast.json")).unwrap())
                .unwrap();
        assert!(a.is_array());
        assert_eq!(a[0]["absolutePath"], "contracts/A.sol");
        assert!(dir.path().join("B.ast.json").exists());
        assert!(!dir.path().join("B.tsol_json.ast").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("Broken.ast.json")).unwrap(),
            "{not json"
        );
    }

    #[test]
    fn test_compile_project_compiles_external_imports() {
        let dir = project();
        let mut config = MergeConfig::new(dir.path());
        config.exclude = vec!["mocks".to_string()];
        let stale = config.ast_dir().join("Stale.ast.json");
        fs::create_dir_all(config.ast_dir()).unwrap();
        fs::write(&stale, "[]").unwrap();

        let compiler = FakeCompiler::new(&["@oz/access/Ownable.sol"]);
        let summary = compile_project(&config, &compiler).unwrap();

        assert_eq!(summary.sources, 2);
        assert_eq!(summary.external, 1);
        assert_eq!(summary.artifacts, 3);
        assert!(!stale.exists());
        assert!(config.ast_dir().join("Ownable.ast.json").exists());

        let calls = compiler.calls.borrow();
        assert_eq!(
            calls.last().unwrap(),
            &dir.path().join("node_modules/@oz/access/Ownable.sol")
        );
    }

    #[test]
    fn test_path_for_compiler() {
        let root = Path::new("proj");
        assert_eq!(
            path_for_compiler(Path::new("proj/contracts/A.sol"), Some(root)).unwrap(),
            PathBuf::from("contracts/A.sol")
        );
        assert_eq!(
            path_for_compiler(Path::new("proj/ast"), Some(root)).unwrap(),
            PathBuf::from("ast")
        );
        assert_eq!(path_for_compiler(root, Some(root)).unwrap(), PathBuf::from("."));
        assert_eq!(
            path_for_compiler(Path::new("/opt/lib/B.sol"), Some(root)).unwrap(),
            PathBuf::from("/opt/lib/B.sol")
        );
        assert_eq!(
            path_for_compiler(Path::new("lib/B.sol"), Some(root)).unwrap(),
            std::env::current_dir().unwrap().join("lib/B.sol")
        );
        assert_eq!(
            path_for_compiler(Path::new("proj/contracts/A.sol"), None).unwrap(),
            PathBuf::from("proj/contracts/A.sol")
        );
    }

    /// A stand-in compiler that only succeeds when both paths resolve from its
    /// working directory, and records the source path it was given.
    #[cfg(unix)]
    const SCRIPT_COMPILER: &str = r#"#!/bin/sh
[ -f "$2" ] || { echo "no such source: $2" >&2; exit 1; }
out="${3#--output-dir=}"
[ -d "$out" ] || { echo "no such output dir: $out" >&2; exit 1; }
name=$(basename "$2" .sol)
printf '{"nodeType":"SourceUnit","id":1,"absolutePath":"%s","exportedSymbols":{},"nodes":[]}' "$2" > "$out/$name.sol_json.ast"
"#;

    #[cfg(unix)]
    #[test]
    fn test_command_compiler_with_relative_root() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::Builder::new()
            .prefix("compile-root")
            .tempdir_in(".")
            .unwrap();
        assert!(dir.path().is_relative());
        fs::create_dir_all(dir.path().join("contracts")).unwrap();
        fs::write(dir.path().join("contracts/Token.sol"), "contract Token {}").unwrap();

        let script = std::env::current_dir().unwrap().join(dir.path()).join("fake-solc");
        fs::write(&script, SCRIPT_COMPILER).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = MergeConfig::new(dir.path());
        config.compiler_path = script;
        let summary = compile_project(&config, &CommandCompiler::from_config(&config)).unwrap();
        assert_eq!(summary.sources, 1);
        assert_eq!(summary.artifacts, 1);

        let tree: Value = serde_json::from_str(
            &fs::read_to_string(config.ast_dir().join("Token.ast.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(tree[0]["absolutePath"], "contracts/Token.sol");
    }

    #[test]
    fn test_compiler_failure_aborts() {
        let dir = project();
        let config = MergeConfig::new(dir.path());
        let err = compile_project(&config, &FailingCompiler).unwrap_err();
        assert!(matches!(err, CoreError::CompilerFailed { .. }));
    }
}
