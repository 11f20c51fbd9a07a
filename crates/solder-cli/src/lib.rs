//! Library interface for the solder CLI commands

use anyhow::{Context, Result};
use solder_core::compiler::CompileSummary;
use solder_core::config::DEFAULT_CONFIG_FILE;
use solder_core::{
    compile_project, load_sources, make_build, CommandCompiler, DependencyGraph, MergeConfig,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Resolve the configuration for a run.
///
/// An explicit config file wins; otherwise `solder.toml` under the root is
/// used when present, and built-in defaults when not.
pub fn load_config(config_path: Option<&Path>, root: Option<&Path>) -> Result<MergeConfig> {
    if let Some(path) = config_path {
        return MergeConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    let root = root.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let candidate = root.join(DEFAULT_CONFIG_FILE);
    if candidate.is_file() {
        debug!("Using config {}", candidate.display());
        return MergeConfig::from_file(&candidate)
            .with_context(|| format!("Failed to load config {}", candidate.display()));
    }
    Ok(MergeConfig::new(root))
}

/// Merge the compiled trees and write the build document
pub fn handle_merge(config: &MergeConfig, output: Option<&Path>) -> Result<()> {
    let report = make_build(config).context("Failed to merge syntax trees")?;

    let json = serde_json::to_string_pretty(&report.build)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote build to {}", path.display());
        }
        None => println!("{}", json),
    }

    if let Some(path) = &config.diagnostics_path {
        report
            .diagnostics
            .export_to_file(path)
            .with_context(|| format!("Failed to write diagnostics {}", path.display()))?;
        info!("Wrote diagnostics to {}", path.display());
    }

    let unresolved = report.diagnostics.unresolved.len();
    if unresolved > 0 {
        warn!("{} references were left unresolved", unresolved);
    }
    info!(
        "Merged {} files ({} ids)",
        report.diagnostics.files.len(),
        report.diagnostics.next_id()
    );
    Ok(())
}

/// The order files would be merged in
pub fn handle_order(config: &MergeConfig) -> Result<Vec<String>> {
    let loaded = load_sources(&config.ast_dir(), &config.root_prefix())
        .context("Failed to load syntax trees")?;
    let order = DependencyGraph::from_sources(&loaded)
        .order(config.order)
        .context("Failed to order source files")?;
    Ok(order)
}

/// Run the external compiler over the whole project
pub fn handle_compile(config: &MergeConfig) -> Result<CompileSummary> {
    let compiler = CommandCompiler::from_config(config);
    compile_project(config, &compiler).context("Compilation failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use solder_test_fixtures::{TestProject, BASE_PATH, DERIVED_PATH};

    #[test]
    fn test_load_config_defaults_without_file() {
        let project = TestProject::new();
        let config = load_config(None, Some(project.root())).unwrap();
        assert_eq!(config, MergeConfig::new(project.root()));
    }

    #[test]
    fn test_load_config_picks_up_project_file() {
        let project = TestProject::new();
        project.write_source(DEFAULT_CONFIG_FILE, "unresolved = \"error\"\n");

        let config = load_config(None, Some(project.root())).unwrap();
        assert_eq!(config.unresolved, solder_core::UnresolvedPolicy::Error);
    }

    #[test]
    fn test_load_config_reports_bad_file() {
        let project = TestProject::new();
        let path = project.write_source("broken.toml", "order = 3");
        assert!(load_config(Some(&path), None).is_err());
    }

    #[test]
    fn test_handle_merge_writes_build_and_diagnostics() {
        let project = TestProject::with_inheritance();
        let mut config = MergeConfig::new(project.root());
        config.diagnostics_path = Some(project.root().join("diagnostics.json"));
        let output = project.root().join("out").join("build.json");

        handle_merge(&config, Some(&output)).unwrap();

        let build: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(build["output"]["sources"][DERIVED_PATH]["id"], 1);

        let diagnostics: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(project.root().join("diagnostics.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(diagnostics["strategy"], "dependency-count");
        assert_eq!(diagnostics["files"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_handle_order() {
        let project = TestProject::with_inheritance();
        let order = handle_order(&MergeConfig::new(project.root())).unwrap();
        assert_eq!(order, vec![BASE_PATH, DERIVED_PATH]);
    }
}
