use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::AppConfig;

/// Builds a `GlobSet` from `.gitignore`-style file patterns.
pub fn build_globset_from_patterns<'a>(patterns: impl IntoIterator<Item = &'a str>) -> GlobSet {
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        let trimmed_pattern = pattern.trim();
        if trimmed_pattern.is_empty() || trimmed_pattern.starts_with('#') {
            continue;
        }

        // A pattern matches a file name anywhere in the tree.
        match Glob::new(&format!("**/{}", trimmed_pattern)) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => tracing::warn!("Skipping invalid ignore pattern {:?}: {}", pattern, e),
        }
    }

    builder.build().unwrap_or_else(|e| {
        tracing::error!("Failed to build glob set from patterns: {}", e);
        GlobSet::empty()
    })
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

fn is_path_like(pattern: &str) -> bool {
    pattern.contains(['/', '\\'])
}

/// Decides which scanned files are outside the reconciled universe.
///
/// Entries of `ignored_files` are treated as exact paths when they are
/// absolute, as glob patterns when they contain glob syntax, as exact paths
/// again when they contain a separator, and as bare file names otherwise. Anything below an ignored subfolder or the GST
/// submitted root is ignored as well.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    exact_paths: HashSet<PathBuf>,
    names: HashSet<String>,
    globs: GlobSet,
    subfolders: Vec<PathBuf>,
}

impl IgnoreRules {
    pub fn from_config(config: &AppConfig) -> Self {
        let mut exact_paths = HashSet::new();
        let mut names = HashSet::new();
        let mut patterns = Vec::new();

        for entry in &config.ignored_files {
            if Path::new(entry).is_absolute() {
                exact_paths.insert(PathBuf::from(entry));
            } else if is_glob(entry) {
                patterns.push(entry.as_str());
            } else if is_path_like(entry) {
                exact_paths.insert(PathBuf::from(entry));
            } else {
                names.insert(entry.clone());
            }
        }

        let mut subfolders: Vec<PathBuf> = config.ignored_subfolders.iter().cloned().collect();
        if let Some(gst_root) = &config.gst_submitted_root {
            subfolders.push(gst_root.clone());
        }

        Self {
            exact_paths,
            names,
            globs: build_globset_from_patterns(patterns),
            subfolders,
        }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.exact_paths.contains(path) {
            return true;
        }
        if self.subfolders.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }
        let name_ignored = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.names.contains(name))
            .unwrap_or(false);
        name_ignored || self.globs.is_match(path)
    }

    pub fn is_subfolder_ignored(&self, dir: &Path) -> bool {
        self.subfolders.iter().any(|ignored| dir.starts_with(ignored))
    }
}
