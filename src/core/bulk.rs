//! Applies one operation to many files at once.
//!
//! Each batch is a single store write, while every file gets its own
//! `UpdateTracking` action so undo steps back one file at a time. A file that
//! fails never aborts the rest of the batch.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::engine::{absolute, stat_bill, MirrorPlan, ReconciliationEngine};
use super::error::CoreResult;
use super::history::UndoableAction;
use super::months::BillMonth;
use super::tracking::{RecordChange, TrackingRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl BulkFailure {
    pub(crate) fn new(path: &Path, error: impl std::fmt::Display) -> Self {
        Self {
            path: path.to_path_buf(),
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    /// Files whose record was written.
    pub succeeded: Vec<PathBuf>,
    /// Files that could not be read and were left alone.
    pub failed: Vec<BulkFailure>,
    /// Files whose record was written but whose mirrored copy failed.
    pub mirror_errors: Vec<BulkFailure>,
    /// Files that needed no change.
    pub unchanged: Vec<PathBuf>,
}

impl BulkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.mirror_errors.is_empty()
    }
}

/// The pending effects of a batch, committed together.
#[derive(Default)]
struct Batch {
    changes: Vec<RecordChange>,
    actions: Vec<UndoableAction>,
    mirrors: Vec<MirrorPlan>,
    /// Mirrored destinations taken by earlier files of this batch.
    claimed: HashMap<PathBuf, PathBuf>,
}

impl Batch {
    fn add(
        &mut self,
        path: &Path,
        previous: Option<TrackingRecord>,
        next: Option<TrackingRecord>,
        copy: bool,
    ) {
        self.mirrors
            .push(MirrorPlan::new(path, previous.as_ref(), next.as_ref(), copy));
        if let Some(destination) = next.as_ref().and_then(TrackingRecord::mirrored_path) {
            self.claimed
                .entry(destination.to_path_buf())
                .or_insert_with(|| path.to_path_buf());
        }
        self.changes.push(match &next {
            Some(record) => RecordChange::Put(path.to_path_buf(), record.clone()),
            None => RecordChange::Remove(path.to_path_buf()),
        });
        self.actions.push(UndoableAction::UpdateTracking {
            path: path.to_path_buf(),
            previous,
            next,
        });
    }
}

/// Makes every path absolute and drops repeats. Paths that cannot be
/// resolved are reported instead.
pub(super) fn resolve(paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<BulkFailure>) {
    let mut seen = HashSet::new();
    let mut resolved = Vec::new();
    let mut failed = Vec::new();
    for path in paths {
        match absolute(path) {
            Ok(path) => {
                if seen.insert(path.clone()) {
                    resolved.push(path);
                }
            }
            Err(e) => failed.push(BulkFailure::new(path, &e)),
        }
    }
    (resolved, failed)
}

impl ReconciliationEngine {
    /// Marks every file sent in `sent_month`. Each bill month comes from that
    /// file's own record or dates.
    ///
    /// Two files that would mirror to the same destination share the first
    /// one's copy, and the second is listed in `mirror_errors`.
    pub fn bulk_mark_sent(&mut self, paths: &[PathBuf], sent_month: BillMonth) -> CoreResult<BulkOutcome> {
        let now = Utc::now();
        let (paths, failed) = resolve(paths);
        let mut outcome = BulkOutcome {
            failed,
            ..Default::default()
        };
        let mut batch = Batch::default();

        for path in &paths {
            let file = match stat_bill(path) {
                Ok(file) => file,
                Err(e) => {
                    outcome.failed.push(BulkFailure::new(path, &e));
                    continue;
                }
            };
            let previous = self.store.get(path).cloned();
            let (record, placement) =
                self.prepare_sent(&file, previous.as_ref(), sent_month, now, &batch.claimed);
            let copy = placement.unwrap_or_else(|e| {
                outcome.mirror_errors.push(BulkFailure::new(path, &e));
                false
            });
            batch.add(path, previous, Some(record), copy);
            outcome.succeeded.push(path.clone());
        }

        let mirror_errors = self.commit_batch(batch)?;
        outcome.mirror_errors.extend(mirror_errors);
        tracing::info!(
            "Bulk marked {} files sent in {} ({} failed, {} mirror errors)",
            outcome.succeeded.len(),
            sent_month,
            outcome.failed.len(),
            outcome.mirror_errors.len()
        );
        Ok(outcome)
    }

    /// Removes the records of every file and their mirrored copies.
    pub fn bulk_mark_pending(&mut self, paths: &[PathBuf]) -> CoreResult<BulkOutcome> {
        let (paths, failed) = resolve(paths);
        let mut outcome = BulkOutcome {
            failed,
            ..Default::default()
        };
        let mut batch = Batch::default();

        for path in &paths {
            match self.store.get(path).cloned() {
                Some(previous) => {
                    batch.add(path, Some(previous), None, false);
                    outcome.succeeded.push(path.clone());
                }
                None => outcome.unchanged.push(path.clone()),
            }
        }

        let mirror_errors = self.commit_batch(batch)?;
        outcome.mirror_errors.extend(mirror_errors);
        tracing::info!(
            "Bulk marked {} files pending ({} already pending)",
            outcome.succeeded.len(),
            outcome.unchanged.len()
        );
        Ok(outcome)
    }

    /// Sets the bill month of every file. Sent files get their mirrored copy
    /// moved to the matching submission folder.
    pub fn bulk_set_bill_month(&mut self, paths: &[PathBuf], month: BillMonth) -> CoreResult<BulkOutcome> {
        let (paths, failed) = resolve(paths);
        let mut outcome = BulkOutcome {
            failed,
            ..Default::default()
        };
        let mut batch = Batch::default();

        for path in &paths {
            if let Err(e) = stat_bill(path) {
                outcome.failed.push(BulkFailure::new(path, &e));
                continue;
            }
            let previous = self.store.get(path).cloned();
            let mut next = previous.clone().unwrap_or_default();
            next.set_bill_month(Some(month));
            let copy = self
                .plan_mirror(path, &mut next, &batch.claimed)
                .unwrap_or_else(|e| {
                    outcome.mirror_errors.push(BulkFailure::new(path, &e));
                    false
                });
            if !copy && previous.as_ref() == Some(&next) {
                outcome.unchanged.push(path.clone());
                continue;
            }
            batch.add(path, previous, Some(next), copy);
            outcome.succeeded.push(path.clone());
        }

        let mirror_errors = self.commit_batch(batch)?;
        outcome.mirror_errors.extend(mirror_errors);
        tracing::info!(
            "Set bill month {} on {} files ({} failed)",
            month,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    /// One store write for the whole batch, then the submitted tree. Actions
    /// are recorded even if that write fails, since the changes stay in
    /// memory, but no copy is touched until the records are saved.
    ///
    /// Returns the files whose copy could not be placed. Their records are
    /// saved again without a mirrored path.
    fn commit_batch(&mut self, batch: Batch) -> CoreResult<Vec<BulkFailure>> {
        let written = self.store.apply(batch.changes);
        for action in batch.actions {
            self.history.push(action);
        }
        written?;

        let mut failures = Vec::new();
        for plan in &batch.mirrors {
            if let Some(e) = self.apply_mirror(plan) {
                failures.push(BulkFailure::new(plan.source(), &e));
            }
        }
        self.clear_mirrored_paths(failures.iter().map(|failure| failure.path.clone()))?;
        Ok(failures)
    }
}
