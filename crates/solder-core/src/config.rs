//! Project configuration, read from `solder.toml`
//!
//! ```toml
//! root = "."
//! sources_dir = "contracts"
//! ast_output_dir = "ast"
//! order = "dependency-count"
//! unresolved = "warn"
//! exclude = ["mocks", "test"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dependency_graph::OrderStrategy;
use crate::error::{CoreError, Result};
use crate::merge::MergeOptions;
use crate::resolver::UnresolvedPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "solder.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Project root; compiler paths are made relative to it
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Directory holding the project's own sources, relative to `root`
    #[serde(default = "default_sources_dir")]
    pub sources_dir: PathBuf,
    /// Where the per-file syntax trees are written and read
    #[serde(default = "default_ast_output_dir")]
    pub ast_output_dir: PathBuf,
    /// Where third-party sources live, relative to `root`
    #[serde(default = "default_node_modules_dir")]
    pub node_modules_dir: PathBuf,
    /// Inspection snapshot of the merged trees
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default = "default_compiler_path")]
    pub compiler_path: PathBuf,
    /// Directory names skipped during source discovery
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub order: OrderStrategy,
    #[serde(default)]
    pub unresolved: UnresolvedPolicy,
    #[serde(default)]
    pub diagnostics_path: Option<PathBuf>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_sources_dir() -> PathBuf {
    PathBuf::from("contracts")
}

fn default_ast_output_dir() -> PathBuf {
    PathBuf::from("ast")
}

fn default_node_modules_dir() -> PathBuf {
    PathBuf::from("node_modules")
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("build/astBuild.json")
}

fn default_compiler_path() -> PathBuf {
    PathBuf::from("solc")
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self::new(default_root())
    }
}

impl MergeConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sources_dir: default_sources_dir(),
            ast_output_dir: default_ast_output_dir(),
            node_modules_dir: default_node_modules_dir(),
            snapshot_path: default_snapshot_path(),
            compiler_path: default_compiler_path(),
            exclude: Vec::new(),
            order: OrderStrategy::default(),
            unresolved: UnresolvedPolicy::default(),
            diagnostics_path: None,
        }
    }

    /// Read a config file. A relative `root` is taken relative to the file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::parse(&content)?;
        if config.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            config.root = base.join(&config.root);
        }
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(CoreError::Config("root must not be empty".to_string()));
        }
        if self.ast_output_dir.as_os_str().is_empty() {
            return Err(CoreError::Config(
                "ast_output_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn under_root(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn ast_dir(&self) -> PathBuf {
        self.under_root(&self.ast_output_dir)
    }

    pub fn sources_path(&self) -> PathBuf {
        self.under_root(&self.sources_dir)
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.under_root(&self.snapshot_path)
    }

    /// Root as the prefix the compiler writes into `absolutePath`
    pub fn root_prefix(&self) -> String {
        let root = self.root.to_string_lossy();
        match root.as_ref() {
            "." | "./" => String::new(),
            other => other.trim_start_matches("./").to_string(),
        }
    }

    /// Source directory relative to the root, as it appears in normalized paths
    fn sources_prefix(&self) -> String {
        let sources = self
            .sources_dir
            .strip_prefix(&self.root)
            .unwrap_or(&self.sources_dir);
        sources
            .to_string_lossy()
            .trim_start_matches("./")
            .trim_end_matches('/')
            .to_string()
    }

    /// Whether a normalized path belongs to the project rather than a dependency
    pub fn is_project_source(&self, path: &str) -> bool {
        let prefix = self.sources_prefix();
        !prefix.is_empty() && path.starts_with(&format!("{}/", prefix))
    }

    /// On-disk location of a normalized source path
    pub fn source_file(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else if self.is_project_source(&path.to_string_lossy()) {
            self.root.join(path)
        } else {
            self.under_root(&self.node_modules_dir).join(path)
        }
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            root: self.root_prefix(),
            order: self.order,
            unresolved: self.unresolved,
        }
    }
}

impl FromStr for MergeConfig {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let config = MergeConfig::parse(
            r#"
root = "/work/token"
sources_dir = "src"
exclude = ["mocks"]
order = "topological"
unresolved = "error"
"#,
        )
        .unwrap();

        assert_eq!(config.root, PathBuf::from("/work/token"));
        assert_eq!(config.order, OrderStrategy::Topological);
        assert_eq!(config.unresolved, UnresolvedPolicy::Error);
        assert_eq!(config.exclude, vec!["mocks"]);
        assert_eq!(config.ast_dir(), PathBuf::from("/work/token/ast"));
        assert_eq!(
            config.snapshot_file(),
            PathBuf::from("/work/token/build/astBuild.json")
        );
    }

    #[test]
    fn test_defaults() {
        let config = MergeConfig::parse("").unwrap();
        assert_eq!(config, MergeConfig::default());
        assert_eq!(config.order, OrderStrategy::DependencyCount);
        assert_eq!(config.unresolved, UnresolvedPolicy::Warn);
        assert_eq!(config.root_prefix(), "");
    }

    #[test]
    fn test_rejects_unknown_policy() {
        assert!(MergeConfig::parse(r#"unresolved = "explode""#).is_err());
    }

    #[test]
    fn test_source_file_locations() {
        let config = MergeConfig::new("/work/token");

        assert!(config.is_project_source("contracts/Token.sol"));
        assert!(!config.is_project_source("contractsX/Token.sol"));
        assert_eq!(
            config.source_file("contracts/Token.sol"),
            PathBuf::from("/work/token/contracts/Token.sol")
        );
        assert_eq!(
            config.source_file("@openzeppelin/contracts/access/Ownable.sol"),
            PathBuf::from("/work/token/node_modules/@openzeppelin/contracts/access/Ownable.sol")
        );
    }
}
