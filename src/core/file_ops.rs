//! Deleting, moving and exporting bills, with the tracking records kept in step.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::bulk::{resolve, BulkFailure};
use super::engine::{absolute_dir, FileStatusView, ReconciliationEngine};
use super::error::{CoreError, CoreResult};
use super::tracking::RecordChange;
use crate::utils::persist::write_json;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedFile {
    pub from: PathBuf,
    pub to: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileOpReport {
    pub deleted: Vec<PathBuf>,
    pub moved: Vec<MovedFile>,
    pub failed: Vec<BulkFailure>,
}

/// The document written by [`export_report`].
#[derive(Debug, Serialize)]
pub struct ExportedReport<'a> {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub sent: usize,
    pub pending: usize,
    pub files: &'a [FileStatusView],
}

/// Deletes each file from disk. Failures are collected per path.
pub fn delete_files(paths: &[PathBuf]) -> FileOpReport {
    let mut report = FileOpReport::default();
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::info!("Deleted {:?}", path);
                report.deleted.push(path.clone());
            }
            Err(e) => {
                tracing::warn!("Could not delete {:?}: {}", path, e);
                report.failed.push(BulkFailure::new(path, e));
            }
        }
    }
    report
}

/// Moves each file into `destination`. An existing file of the same name is
/// kept and the moved one gets a numbered name instead.
pub fn move_files(paths: &[PathBuf], destination: &Path) -> CoreResult<FileOpReport> {
    if !destination.is_dir() {
        return Err(CoreError::NotADirectory(destination.to_path_buf()));
    }
    let mut report = FileOpReport::default();
    for path in paths {
        let Some(file_name) = path.file_name() else {
            report
                .failed
                .push(BulkFailure::new(path, CoreError::UnknownFile(path.clone())));
            continue;
        };
        let mut target = destination.join(file_name);
        if target == *path {
            continue;
        }
        if target.exists() {
            target = resolve_conflict(&target);
        }
        match move_file(path, &target) {
            Ok(()) => {
                tracing::info!("Moved {:?} to {:?}", path, target);
                report.moved.push(MovedFile {
                    from: path.clone(),
                    to: target,
                });
            }
            Err(e) => {
                tracing::warn!("Could not move {:?}: {}", path, e);
                report.failed.push(BulkFailure::new(path, e));
            }
        }
    }
    Ok(report)
}

/// `report.pdf` becomes `report_1.pdf`, `report_2.pdf`, ... until free.
fn resolve_conflict(dest: &Path) -> PathBuf {
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = dest
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Renames, falling back to copy and delete across file systems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            tracing::debug!("Rename failed ({}), copying instead", rename_error);
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Writes the status of every file as one JSON document.
pub fn export_report(files: &[FileStatusView], destination: &Path) -> CoreResult<()> {
    let sent = files.iter().filter(|f| f.sent_month.is_some()).count();
    let report = ExportedReport {
        generated_at: Utc::now(),
        total: files.len(),
        sent,
        pending: files.len() - sent,
        files,
    };
    write_json(destination, &report)?;
    tracing::info!("Exported {} files to {:?}", files.len(), destination);
    Ok(())
}

impl ReconciliationEngine {
    /// Deletes bills from disk and forgets their records and tags. Mirrored
    /// copies stay in the submitted tree.
    pub fn delete_files(&mut self, paths: &[PathBuf]) -> CoreResult<FileOpReport> {
        let (paths, failed) = resolve(paths);
        let mut report = delete_files(&paths);
        report.failed.extend(failed);
        let changes: Vec<RecordChange> = report
            .deleted
            .iter()
            .filter(|path| self.store.get(path).is_some())
            .map(|path| RecordChange::Remove(path.clone()))
            .collect();
        self.store.apply(changes)?;

        let before = self.config.tags.len();
        for path in &report.deleted {
            self.config.tags.remove(path);
        }
        if self.config.tags.len() != before {
            self.config_store.save(&self.config)?;
        }
        Ok(report)
    }

    /// Moves bills and carries their records and tags to the new paths.
    pub fn move_files(&mut self, paths: &[PathBuf], destination: &Path) -> CoreResult<FileOpReport> {
        let destination = absolute_dir(destination)?;
        let (paths, failed) = resolve(paths);
        let mut report = move_files(&paths, &destination)?;
        report.failed.extend(failed);
        let mut changes = Vec::new();
        let mut tags_moved = false;
        for moved in &report.moved {
            if let Some(record) = self.store.get(&moved.from).cloned() {
                changes.push(RecordChange::Remove(moved.from.clone()));
                changes.push(RecordChange::Put(moved.to.clone(), record));
            }
            if let Some(tags) = self.config.tags.remove(&moved.from) {
                self.config.tags.insert(moved.to.clone(), tags);
                tags_moved = true;
            }
        }
        self.store.apply(changes)?;
        if tags_moved {
            self.config_store.save(&self.config)?;
        }
        Ok(report)
    }

    pub async fn export_report(&self, destination: &Path) -> CoreResult<usize> {
        let files = self.file_statuses().await?;
        export_report(&files, destination)?;
        Ok(files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_names_get_a_counter() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("report.pdf");
        fs::write(&target, b"a").unwrap();
        fs::write(dir.path().join("report_1.pdf"), b"b").unwrap();
        assert_eq!(resolve_conflict(&target), dir.path().join("report_2.pdf"));
    }

    #[test]
    fn move_keeps_existing_file_at_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from_dir = dir.path().join("June");
        let to_dir = dir.path().join("July");
        fs::create_dir_all(&from_dir).unwrap();
        fs::create_dir_all(&to_dir).unwrap();
        let source = from_dir.join("report.pdf");
        fs::write(&source, b"new").unwrap();
        fs::write(to_dir.join("report.pdf"), b"old").unwrap();

        let report = move_files(&[source.clone()], &to_dir).unwrap();
        assert_eq!(report.moved.len(), 1);
        assert_eq!(report.moved[0].to, to_dir.join("report_1.pdf"));
        assert_eq!(fs::read(to_dir.join("report.pdf")).unwrap(), b"old");
        assert!(!source.exists());
    }

    #[test]
    fn move_into_a_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.pdf");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            move_files(&[file.clone()], &file),
            Err(CoreError::NotADirectory(_))
        ));
    }

    #[test]
    fn delete_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.pdf");
        fs::write(&present, b"x").unwrap();
        let report = delete_files(&[present.clone(), dir.path().join("gone.pdf")]);
        assert_eq!(report.deleted, vec![present]);
        assert_eq!(report.failed.len(), 1);
    }
}
