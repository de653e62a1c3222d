//! Read-only enumeration of the bill folder.
//!
//! Nothing here writes to disk or keeps state between calls. Paths that cannot
//! be read are reported next to the results instead of failing the scan.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use super::error::{CoreError, CoreResult};
use super::months::{bill_month_from_dates, BillMonth};
use super::tree_generator::{TreeGenerator, TreeNode};
use crate::utils::file_detection::{is_bill_file, is_hidden};

/// A snapshot of one bill file on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub path: PathBuf,
    pub name: String,
    pub extension: Option<String>,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// The selected subfolder this file was found under.
    pub folder: PathBuf,
}

impl TrackedFile {
    /// Reads the metadata of `path`. `folder` is recorded as-is.
    pub fn from_path(path: &Path, folder: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase()),
            size: metadata.len(),
            created: metadata.created().ok().map(to_utc),
            modified: metadata.modified().ok().map(to_utc),
            folder: folder.to_path_buf(),
        })
    }

    /// The accounting period inferred from this file's own dates.
    pub fn bill_month(&self) -> BillMonth {
        bill_month_from_dates(self.created, self.modified)
    }
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subfolder {
    pub name: String,
    pub path: PathBuf,
}

/// A path that could not be read, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl From<&CoreError> for ScanFailure {
    fn from(error: &CoreError) -> Self {
        let path = match error {
            CoreError::Scan { path, .. } | CoreError::NotADirectory(path) => path.clone(),
            _ => PathBuf::new(),
        };
        Self {
            path,
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderStructure {
    pub subfolders: Vec<Subfolder>,
    pub tree: Vec<TreeNode>,
    pub errors: Vec<ScanFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderResult {
    pub folder_name: String,
    pub folder_path: PathBuf,
    pub files: Vec<TrackedFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub folders: Vec<FolderResult>,
    pub errors: Vec<ScanFailure>,
}

impl ScanReport {
    pub fn files(&self) -> impl Iterator<Item = &TrackedFile> {
        self.folders.iter().flat_map(|folder| folder.files.iter())
    }

    pub fn file_count(&self) -> usize {
        self.folders.iter().map(|folder| folder.files.len()).sum()
    }
}

fn scan_failure(path: &Path, error: &walkdir::Error) -> ScanFailure {
    let path = error.path().unwrap_or(path).to_path_buf();
    ScanFailure {
        reason: format!("Could not scan {}: {}", path.display(), error),
        path,
    }
}

/// Lists the immediate subfolders of `root` and the full directory tree below it.
///
/// The root itself must be a readable directory. Unreadable directories deeper
/// down are collected in `errors` and skipped.
pub async fn scan(root: &Path) -> CoreResult<FolderStructure> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan_blocking(&root)).await?
}

/// Lists only the immediate, non-hidden subfolders of `root`, sorted by name.
pub async fn list_subfolders(root: &Path) -> CoreResult<Vec<Subfolder>> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || read_subfolders(&root)).await?
}

fn read_subfolders(root: &Path) -> CoreResult<Vec<Subfolder>> {
    let entries = fs::read_dir(root).map_err(|source| CoreError::Scan {
        path: root.to_path_buf(),
        source,
    })?;

    let mut subfolders: Vec<Subfolder> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|entry| !is_hidden(&entry.path()))
        .map(|entry| Subfolder {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry.path(),
        })
        .collect();
    subfolders.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(subfolders)
}

fn scan_blocking(root: &Path) -> CoreResult<FolderStructure> {
    let subfolders = read_subfolders(root)?;

    let mut directories = Vec::new();
    let mut file_counts: HashMap<PathBuf, usize> = HashMap::new();
    let mut errors = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e.path()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let failure = scan_failure(root, &e);
                tracing::warn!("{}", failure.reason);
                errors.push(failure);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            directories.push(entry.path().to_path_buf());
        } else if entry.file_type().is_file() && is_bill_file(entry.path()) {
            if let Some(parent) = entry.path().parent() {
                *file_counts.entry(parent.to_path_buf()).or_default() += 1;
            }
        }
    }

    let tree = TreeGenerator::build_tree(root, &directories, &file_counts);
    tracing::info!(
        "Scanned structure of {:?}: {} subfolders, {} directories",
        root,
        subfolders.len(),
        directories.len()
    );

    Ok(FolderStructure {
        subfolders,
        tree,
        errors,
    })
}

/// Collects the bill files below each of `paths`, recursively.
///
/// Folders are walked in parallel. A folder that is missing or unreadable
/// yields an empty result plus an entry in `errors`; the other folders are
/// unaffected.
pub async fn scan_files(paths: Vec<PathBuf>) -> CoreResult<ScanReport> {
    Ok(tokio::task::spawn_blocking(move || scan_files_blocking(&paths)).await?)
}

fn scan_files_blocking(paths: &[PathBuf]) -> ScanReport {
    let results: Vec<(FolderResult, Vec<ScanFailure>)> =
        paths.par_iter().map(|path| scan_folder(path)).collect();

    let mut report = ScanReport::default();
    for (folder, errors) in results {
        report.folders.push(folder);
        report.errors.extend(errors);
    }

    tracing::info!(
        "Scanned {} folders: {} bills, {} errors",
        report.folders.len(),
        report.file_count(),
        report.errors.len()
    );
    report
}

fn scan_folder(folder: &Path) -> (FolderResult, Vec<ScanFailure>) {
    let mut result = FolderResult {
        folder_name: folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| folder.display().to_string()),
        folder_path: folder.to_path_buf(),
        files: Vec::new(),
    };
    let mut errors = Vec::new();

    if !folder.is_dir() {
        let failure = ScanFailure::from(&CoreError::NotADirectory(folder.to_path_buf()));
        tracing::warn!("Skipping folder: {}", failure.reason);
        errors.push(failure);
        return (result, errors);
    }

    for entry in WalkDir::new(folder)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_hidden(e.path()))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let failure = scan_failure(folder, &e);
                tracing::warn!("{}", failure.reason);
                errors.push(failure);
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_bill_file(entry.path()) {
            continue;
        }

        match TrackedFile::from_path(entry.path(), folder) {
            Ok(file) => result.files.push(file),
            Err(source) => {
                let failure = ScanFailure::from(&CoreError::Scan {
                    path: entry.path().to_path_buf(),
                    source,
                });
                tracing::warn!("{}", failure.reason);
                errors.push(failure);
            }
        }
    }

    result.files.sort_by(|a, b| a.path.cmp(&b.path));
    (result, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_helpers::{running_as_root, setup_test_logging, write_bill};

    #[tokio::test]
    async fn lists_subfolders_and_tree() {
        setup_test_logging();
        let dir = tempfile::tempdir().unwrap();
        write_bill(dir.path(), "June/report.pdf");
        write_bill(dir.path(), "June/Fuel/pump.jpg");
        write_bill(dir.path(), "April/a.pdf");
        write_bill(dir.path(), "April/notes.txt");
        fs::create_dir_all(dir.path().join(".cache")).unwrap();

        let structure = scan(dir.path()).await.unwrap();
        let names: Vec<_> = structure.subfolders.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["April", "June"]);
        assert_eq!(structure.tree[0].file_count, 1);
        assert_eq!(structure.tree[1].total_files(), 2);
        assert!(structure.errors.is_empty());
    }

    #[tokio::test]
    async fn unreadable_root_is_a_scan_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = scan(&dir.path().join("missing")).await;
        assert!(matches!(result, Err(CoreError::Scan { .. })));
    }

    #[tokio::test]
    async fn missing_folder_is_empty_plus_error() {
        setup_test_logging();
        let dir = tempfile::tempdir().unwrap();
        write_bill(dir.path(), "June/report.pdf");
        write_bill(dir.path(), "June/old/older.PDF");

        let report = scan_files(vec![dir.path().join("June"), dir.path().join("Gone")])
            .await
            .unwrap();

        assert_eq!(report.folders.len(), 2);
        assert_eq!(report.folders[0].files.len(), 2);
        assert!(report.folders[1].files.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, dir.path().join("Gone"));

        let file = &report.folders[0].files[1];
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.extension.as_deref(), Some("pdf"));
        assert_eq!(file.folder, dir.path().join("June"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_subdirectory_does_not_fail_the_folder() {
        use std::os::unix::fs::PermissionsExt;
        if running_as_root() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        write_bill(dir.path(), "June/ok.pdf");
        let locked = dir.path().join("June/locked");
        write_bill(dir.path(), "June/locked/secret.pdf");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let report = scan_files(vec![dir.path().join("June")]).await.unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(report.file_count(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, locked);
    }
}
