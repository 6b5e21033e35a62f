//! Document source: enumerates corpus identifiers and supplies their bytes.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::CorpusConfig;

pub trait DocumentSource: Send + Sync {
    /// Sorted document identifiers currently in the corpus.
    fn list(&self) -> Result<Vec<String>>;

    fn read(&self, id: &str) -> Result<Vec<u8>>;

    /// Where the documents come from, for reports and logs.
    fn location(&self) -> String;
}

/// Files under a directory that match the configured include globs.
pub struct DirectorySource {
    root: PathBuf,
    include: GlobSet,
    recursive: bool,
}

impl DirectorySource {
    pub fn new(config: &CorpusConfig) -> Result<Self> {
        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            recursive: config.recursive,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Whether `path` looks like a corpus document: not a directory, not
    /// hidden, and matching the include set. Works for paths that no longer
    /// exist, which is what a delete event carries.
    pub fn is_document_path(&self, path: &Path) -> bool {
        if path.is_dir() {
            return false;
        }
        let hidden = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if hidden {
            return false;
        }
        let Some(relative) = self.relative_path(path) else {
            return false;
        };
        if !self.recursive && relative.components().count() > 1 {
            return false;
        }
        self.include.is_match(&relative)
    }

    /// Path relative to the corpus root. Watcher events carry absolute,
    /// canonical paths, so the canonical root is tried as well.
    fn relative_path(&self, path: &Path) -> Option<PathBuf> {
        if let Ok(rel) = path.strip_prefix(&self.root) {
            return Some(rel.to_path_buf());
        }
        if let Ok(canonical) = self.root.canonicalize() {
            if let Ok(rel) = path.strip_prefix(&canonical) {
                return Some(rel.to_path_buf());
            }
        }
        if path.is_relative() {
            return Some(path.to_path_buf());
        }
        None
    }
}

impl DocumentSource for DirectorySource {
    fn list(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut ids = Vec::new();

        for entry in WalkDir::new(&self.root).max_depth(max_depth) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !self.is_document_path(path) {
                continue;
            }
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            ids.push(relative.to_string_lossy().replace('\\', "/"));
        }

        ids.sort();
        Ok(ids)
    }

    fn read(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.root.join(id);
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .with_context(|| format!("Invalid include glob: {}", pattern))?,
        );
    }
    Ok(builder.build()?)
}
