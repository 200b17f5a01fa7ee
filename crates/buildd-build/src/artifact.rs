//! Build result collection
//!
//! Successful builds hand their result files to the dispatcher. Package
//! builds describe their output in a `.changes` file whose `Files:` section
//! lists every produced file; the collector reads those listings instead of
//! guessing from directory contents.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{BuildError, Result};

/// Kind of result file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Changes,
    Deb,
    DebugSymbols,
    SourceDescription,
    Tarball,
    BuildLog,
    Manifest,
    Other,
}

/// Result file information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    /// File path
    pub path: PathBuf,
    /// Kind of file
    pub kind: ArtifactKind,
    /// Package name, when the file name follows `package_version_arch`
    pub package_name: Option<String>,
}

impl BuildArtifact {
    /// Classify a result file by its name
    pub fn from_path(path: &Path) -> Self {
        let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or_default();

        let kind = if filename.ends_with(".changes") {
            ArtifactKind::Changes
        } else if filename.ends_with(".ddeb") || filename.contains("-dbgsym_") {
            ArtifactKind::DebugSymbols
        } else if filename.ends_with(".deb") || filename.ends_with(".udeb") {
            ArtifactKind::Deb
        } else if filename.ends_with(".dsc") {
            ArtifactKind::SourceDescription
        } else if filename.contains(".tar.") {
            ArtifactKind::Tarball
        } else if filename == "manifest" {
            ArtifactKind::Manifest
        } else if filename.starts_with("buildlog") {
            ArtifactKind::BuildLog
        } else {
            ArtifactKind::Other
        };

        let package_name = filename
            .split_once('_')
            .map(|(name, _)| name.to_string())
            .filter(|name| !name.is_empty());

        Self { path: path.to_path_buf(), kind, package_name }
    }
}

/// Collects result files from a build directory
#[derive(Debug, Clone, Default)]
pub struct ArtifactCollector;

impl ArtifactCollector {
    pub fn new() -> Self {
        Self
    }

    /// Collect every `*<suffix>` changes file in `dir` together with the
    /// files it lists. Fails when no changes file exists or a listed file
    /// is missing.
    pub fn collect_changes(&self, dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(dir).map_err(|e| {
            BuildError::artifact_collection(format!("Failed to read {}: {e}", dir.display()))
        })?;

        let mut changes_files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|f| f.to_str())
                .is_some_and(|name| name.ends_with(suffix));
            if matches && path.is_file() {
                changes_files.push(path);
            }
        }
        changes_files.sort();

        if changes_files.is_empty() {
            return Err(BuildError::artifact_collection(format!(
                "No *{suffix} file in {}",
                dir.display()
            )));
        }

        let mut results = Vec::new();
        for changes in changes_files {
            let content = fs::read_to_string(&changes)?;
            for name in parse_changes_files(&content) {
                let path = dir.join(&name);
                if !path.is_file() {
                    return Err(BuildError::artifact_collection(format!(
                        "{} lists missing file {name}",
                        changes.display()
                    )));
                }
                debug!("Found artifact: {}", name);
                results.push(path);
            }
            results.push(changes);
        }

        Ok(results)
    }

    /// Include an extra file when it exists
    pub fn optional_file(&self, path: &Path) -> Option<PathBuf> {
        path.is_file().then(|| path.to_path_buf())
    }

    /// Log a short summary of the collected files
    pub fn log_summary(&self, files: &[PathBuf]) {
        let artifacts: Vec<BuildArtifact> =
            files.iter().map(|f| BuildArtifact::from_path(f)).collect();
        let packages = artifacts
            .iter()
            .filter(|a| matches!(a.kind, ArtifactKind::Deb | ArtifactKind::DebugSymbols))
            .count();
        info!("Collected {} result files ({} binary packages)", artifacts.len(), packages);
    }
}

/// File names listed in the `Files:` section of a changes file
pub fn parse_changes_files(content: &str) -> Vec<String> {
    let mut files = Vec::new();
    let mut in_files = false;

    for line in content.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if in_files {
                if let Some(name) = line.split_whitespace().last() {
                    files.push(name.to_string());
                }
            }
        } else {
            in_files = line.trim_end() == "Files:";
        }
    }

    files
}
