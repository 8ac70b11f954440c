// SPDX-License-Identifier: Apache-2.0

use glob::glob;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::Error;
use crate::config::LogPathConfig;

/// Discovers files for one configured path spec: a glob, optionally followed
/// by a bounded recursive walk for directory matches. Recursive discovery
/// keeps only files with the default `.log` extension.
#[derive(Debug)]
pub struct FileFinder {
    specs: Vec<LogPathConfig>,
    /// Pre-compiled exclude patterns for efficient matching
    exclude_patterns: Vec<glob::Pattern>,
}

impl FileFinder {
    /// Invalid exclude patterns are logged and skipped; an invalid include
    /// glob surfaces per-spec at find time so one bad spec cannot take down
    /// the rest.
    pub fn new(specs: Vec<LogPathConfig>, excludes: &[String]) -> Self {
        let exclude_patterns = excludes
            .iter()
            .filter_map(|pattern| match glob::Pattern::new(pattern) {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!("Invalid exclude pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();

        Self {
            specs,
            exclude_patterns,
        }
    }

    #[inline]
    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    /// Expand every spec and return (path, spec index) pairs, deduplicated.
    pub fn find_files(&self) -> Result<Vec<(PathBuf, usize)>, Error> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for (idx, spec) in self.specs.iter().enumerate() {
            let matches = match glob(&spec.path) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %spec.path, error = %e, "Invalid log path glob, skipping spec");
                    continue;
                }
            };

            for entry in matches {
                let path = entry.map_err(|e| Error::Io(e.into()))?;

                if path.is_dir() {
                    if spec.recursive {
                        self.walk_dir(&path, spec, idx, &mut seen, &mut found);
                    }
                    continue;
                }

                if self.is_excluded(&path) {
                    continue;
                }

                if seen.insert(path.clone()) {
                    found.push((path, idx));
                }
            }
        }

        Ok(found)
    }

    /// Spec lookup for a path delivered by the filesystem watcher. First
    /// matching spec wins, mirroring discovery order.
    pub fn match_spec(&self, path: &Path) -> Option<usize> {
        if self.is_excluded(path) {
            return None;
        }
        for (idx, spec) in self.specs.iter().enumerate() {
            if let Ok(pattern) = glob::Pattern::new(&spec.path) {
                if pattern.matches_path(path) {
                    return Some(idx);
                }
            }
        }
        None
    }

    pub fn spec(&self, idx: usize) -> &LogPathConfig {
        &self.specs[idx]
    }

    fn walk_dir(
        &self,
        dir: &Path,
        spec: &LogPathConfig,
        idx: usize,
        seen: &mut HashSet<PathBuf>,
        found: &mut Vec<(PathBuf, usize)>,
    ) {
        let mut walker = WalkDir::new(dir).follow_links(false);
        if spec.max_depth > 0 {
            walker = walker.max_depth(spec.max_depth);
        }

        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                continue;
            }
            if self.is_excluded(&path) {
                continue;
            }
            if seen.insert(path.clone()) {
                found.push((path, idx));
            }
        }
    }
}
