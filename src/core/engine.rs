//! The reconciliation engine: owns configuration, tracking records and the
//! action log, and keeps all three consistent with each other.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::error::{CoreError, CoreResult, MirrorOperation};
use super::gst::{self, derive_folder_names, GstMatch};
use super::history::{ActionLog, UndoableAction};
use super::ignore::IgnoreRules;
use super::mirror;
use super::months::BillMonth;
use super::scanner::{self, FolderStructure, ScanFailure, TrackedFile};
use super::tracking::{
    BillStatus, JsonFileStorage, RecordChange, TrackingMap, TrackingRecord, TrackingStore,
};
use crate::config::settings::{JsonConfigStorage, TRACKING_FILE};
use crate::config::{AppConfig, ConfigStorage, Settings};

/// The outcome of one [`ReconciliationEngine::refresh`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Candidate files found in the selected subfolders.
    pub scanned: usize,
    /// Records created or changed from GST evidence.
    pub updated: usize,
    /// Sent records deleted because no submitted copy exists any more.
    pub removed: usize,
    pub scan_errors: Vec<ScanFailure>,
    /// False when no GST root is configured.
    pub gst_checked: bool,
}

impl ReconcileReport {
    pub fn changed(&self) -> usize {
        self.updated + self.removed
    }
}

/// One candidate file together with what the engine knows about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileStatusView {
    #[serde(flatten)]
    pub file: TrackedFile,
    pub status: BillStatus,
    /// The recorded bill month, or the one inferred from the file dates.
    pub bill_month: BillMonth,
    pub sent_month: Option<BillMonth>,
    pub sent_at: Option<DateTime<Utc>>,
    pub mirrored_path: Option<PathBuf>,
    pub tags: Vec<String>,
    pub ignored: bool,
}

/// Files of the selected subfolders, split by the ignore rules.
#[derive(Debug, Default)]
pub(super) struct Candidates {
    pub files: Vec<TrackedFile>,
    pub ignored: Vec<TrackedFile>,
    pub errors: Vec<ScanFailure>,
}

/// Holds the busy flag for as long as it lives.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> CoreResult<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CoreError::Busy)?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ReconciliationEngine {
    pub(super) config: AppConfig,
    pub(super) config_store: Box<dyn ConfigStorage>,
    pub(super) store: TrackingStore,
    pub(super) history: ActionLog,
    busy: Arc<AtomicBool>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("root", &self.config.root_path)
            .field("store", &self.store)
            .field("history", &self.history.len())
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl ReconciliationEngine {
    pub fn new(
        config: AppConfig,
        config_store: Box<dyn ConfigStorage>,
        store: TrackingStore,
    ) -> Self {
        Self {
            config,
            config_store,
            store,
            history: ActionLog::default(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens the engine over the JSON documents in `data_dir`.
    pub fn open(data_dir: &Path) -> CoreResult<Self> {
        let config_store = JsonConfigStorage::new(data_dir);
        let config = config_store.load()?.unwrap_or_default();
        let store = TrackingStore::open(Box::new(JsonFileStorage::new(
            data_dir.join(TRACKING_FILE),
        )))?;
        Ok(Self::new(config, Box::new(config_store), store))
    }

    /// Replaces the (empty) action log, e.g. with one persisted by the host.
    pub fn with_history(mut self, history: ActionLog) -> Self {
        self.history = history;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &TrackingStore {
        &self.store
    }

    pub fn history(&self) -> &ActionLog {
        &self.history
    }

    /// The flag that is set while a reconciliation runs.
    pub fn busy_flag(&self) -> Arc<AtomicBool> {
        self.busy.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn root(&self) -> CoreResult<PathBuf> {
        self.config.root_path.clone().ok_or(CoreError::NoRootSelected)
    }

    fn save_config(&self) -> CoreResult<()> {
        self.config_store.save(&self.config)
    }

    // --- Configuration -------------------------------------------------

    /// Sets the bill folder. Choosing a different folder resets the subfolder
    /// selection, which only makes sense for the old root.
    pub fn select_root(&mut self, path: &Path) -> CoreResult<()> {
        let path = absolute_dir(path)?;
        if !path.is_dir() {
            return Err(CoreError::NotADirectory(path));
        }
        if self.config.root_path.as_ref() != Some(&path) {
            self.config.selected_subfolders.clear();
            self.config.ignored_subfolders.clear();
        }
        tracing::info!("Selected bill folder {:?}", path);
        self.config.root_path = Some(path);
        self.save_config()
    }

    /// Restricts scanning to `subfolders`. An empty selection scans all.
    pub fn select_subfolders(&mut self, subfolders: impl IntoIterator<Item = PathBuf>) -> CoreResult<()> {
        self.config.selected_subfolders = subfolders
            .into_iter()
            .map(|subfolder| absolute_dir(&subfolder))
            .collect::<CoreResult<_>>()?;
        self.save_config()
    }

    pub fn ignore_subfolder(&mut self, subfolder: &Path, ignored: bool) -> CoreResult<()> {
        let subfolder = absolute_dir(subfolder)?;
        let changed = if ignored {
            self.config.ignored_subfolders.insert(subfolder)
        } else {
            self.config.ignored_subfolders.remove(&subfolder)
        };
        if changed {
            self.save_config()?;
        }
        Ok(())
    }

    pub fn set_gst_root(&mut self, gst_root: Option<PathBuf>) -> CoreResult<()> {
        let gst_root = gst_root.map(|path| absolute_dir(&path)).transpose()?;
        if let Some(path) = &gst_root {
            if path.exists() && !path.is_dir() {
                return Err(CoreError::NotADirectory(path.clone()));
            }
        }
        self.config.gst_submitted_root = gst_root;
        self.save_config()
    }

    pub fn update_settings(&mut self, settings: Settings) -> CoreResult<()> {
        self.config.settings = settings;
        self.save_config()
    }

    pub fn add_tag(&mut self, path: &Path, tag: &str) -> CoreResult<bool> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Ok(false);
        }
        let tags = self.config.tags.entry(absolute(path)?).or_default();
        if tags.iter().any(|t| t == tag) {
            return Ok(false);
        }
        tags.push(tag.to_string());
        self.save_config()?;
        Ok(true)
    }

    pub fn remove_tag(&mut self, path: &Path, tag: &str) -> CoreResult<bool> {
        let path = absolute(path)?;
        let Some(tags) = self.config.tags.get_mut(&path) else {
            return Ok(false);
        };
        let before = tags.len();
        tags.retain(|t| t != tag);
        if tags.len() == before {
            return Ok(false);
        }
        if tags.is_empty() {
            self.config.tags.remove(&path);
        }
        self.save_config()?;
        Ok(true)
    }

    // --- Scanning ------------------------------------------------------

    /// The subfolders and directory tree of the bill folder.
    pub async fn structure(&self) -> CoreResult<FolderStructure> {
        scanner::scan(&self.root()?).await
    }

    /// The folders a refresh scans: the selection (or every immediate
    /// subfolder) minus ignored subfolders and the GST root.
    pub async fn scan_targets(&self) -> CoreResult<Vec<PathBuf>> {
        let root = self.root()?;
        let rules = IgnoreRules::from_config(&self.config);
        let folders: Vec<PathBuf> = if self.config.selected_subfolders.is_empty() {
            scanner::list_subfolders(&root)
                .await?
                .into_iter()
                .map(|subfolder| subfolder.path)
                .collect()
        } else {
            self.config.selected_subfolders.iter().cloned().collect()
        };
        Ok(folders
            .into_iter()
            .filter(|folder| !rules.is_subfolder_ignored(folder))
            .collect())
    }

    pub(super) async fn candidates(&self) -> CoreResult<Candidates> {
        let folders = self.scan_targets().await?;
        let report = scanner::scan_files(folders).await?;
        let rules = IgnoreRules::from_config(&self.config);

        // Nested selections can yield the same file twice.
        let mut unique: BTreeMap<PathBuf, TrackedFile> = BTreeMap::new();
        for file in report.files() {
            unique.entry(file.path.clone()).or_insert_with(|| file.clone());
        }

        let mut candidates = Candidates {
            errors: report.errors,
            ..Default::default()
        };
        for (path, file) in unique {
            if rules.is_ignored(&path) {
                candidates.ignored.push(file);
            } else {
                candidates.files.push(file);
            }
        }
        Ok(candidates)
    }

    /// Every candidate file with its status. Ignored files are included
    /// only when the display settings ask for them.
    pub async fn file_statuses(&self) -> CoreResult<Vec<FileStatusView>> {
        let candidates = self.candidates().await?;
        let show_ignored = self.config.settings.display.show_ignored;
        let ignored = candidates
            .ignored
            .into_iter()
            .filter(|_| show_ignored)
            .map(|file| (file, true));
        Ok(candidates
            .files
            .into_iter()
            .map(|file| (file, false))
            .chain(ignored)
            .map(|(file, ignored)| self.status_view(file, ignored))
            .collect())
    }

    fn status_view(&self, file: TrackedFile, ignored: bool) -> FileStatusView {
        let record = self.store.get(&file.path);
        FileStatusView {
            status: record.map(TrackingRecord::status).unwrap_or(BillStatus::Pending),
            bill_month: record
                .and_then(TrackingRecord::bill_month)
                .unwrap_or_else(|| file.bill_month()),
            sent_month: record.and_then(TrackingRecord::sent_month),
            sent_at: record.and_then(TrackingRecord::sent_at),
            mirrored_path: record.and_then(|r| r.mirrored_path().map(Path::to_path_buf)),
            tags: self.config.tags_for(&file.path).to_vec(),
            ignored,
            file,
        }
    }

    // --- Reconciliation ------------------------------------------------

    /// Aligns the tracking records with the GST submitted tree.
    ///
    /// Returns [`CoreError::Busy`] without touching anything when another
    /// reconciliation holds the busy flag. A GST root that cannot be read
    /// aborts before any record changes.
    pub async fn refresh(&mut self) -> CoreResult<ReconcileReport> {
        let _guard = BusyGuard::acquire(&self.busy)?;

        let candidates = self.candidates().await?;
        let mut report = ReconcileReport {
            scanned: candidates.files.len(),
            scan_errors: candidates.errors,
            ..Default::default()
        };

        let Some(gst_root) = self.config.gst_submitted_root.clone() else {
            tracing::info!(
                "No GST root configured; {} files tracked manually",
                report.scanned
            );
            return Ok(report);
        };

        let names: HashSet<String> = candidates.files.iter().map(|f| f.name.clone()).collect();
        let matches = gst::scan_submitted_folder(&gst_root, &names).await?;
        report.gst_checked = true;

        let plan = plan_reconciliation(&candidates.files, &matches, self.store.records(), Utc::now());
        report.updated = plan.updated;
        report.removed = plan.removed;
        self.store.apply(plan.changes)?;

        tracing::info!(
            "Reconciled {} files: {} updated, {} removed, {} scan errors",
            report.scanned,
            report.updated,
            report.removed,
            report.scan_errors.len()
        );
        Ok(report)
    }

    // --- Single-file operations ----------------------------------------

    /// The recorded bill month of `path`, or the one its dates suggest.
    pub fn bill_month_for(&self, path: &Path) -> CoreResult<BillMonth> {
        let path = absolute(path)?;
        if let Some(month) = self.store.get(&path).and_then(TrackingRecord::bill_month) {
            return Ok(month);
        }
        Ok(stat_bill(&path)?.bill_month())
    }

    /// Marks one file sent in `sent_month`, then places its mirrored copy.
    ///
    /// A failed copy is logged and leaves the record without a mirrored path.
    pub fn mark_sent(&mut self, path: &Path, sent_month: BillMonth) -> CoreResult<TrackingRecord> {
        let path = absolute(path)?;
        let previous = self.store.get(&path).cloned();
        let file = stat_bill(&path)?;
        let (mut record, placement) =
            self.prepare_sent(&file, previous.as_ref(), sent_month, Utc::now(), &HashMap::new());

        let action = UndoableAction::MarkSent {
            path: path.clone(),
            previous: previous.clone(),
            record: record.clone(),
        };
        let copy = placement.unwrap_or(false);
        if self.commit(&path, Some(record.clone()), previous.as_ref(), copy, action)?.is_some() {
            record.set_mirrored_path(None);
        }
        tracing::info!("Marked {:?} sent in {}", path, sent_month);
        Ok(record)
    }

    /// Forgets everything about `path`. Returns the removed record, or
    /// `None` (and records nothing) when there was none.
    pub fn mark_pending(&mut self, path: &Path) -> CoreResult<Option<TrackingRecord>> {
        let path = absolute(path)?;
        let Some(previous) = self.store.get(&path).cloned() else {
            tracing::debug!("{:?} is already pending", path);
            return Ok(None);
        };
        let action = UndoableAction::MarkPending {
            path: path.clone(),
            previous: previous.clone(),
        };
        self.commit(&path, None, Some(&previous), false, action)?;
        tracing::info!("Marked {:?} pending", path);
        Ok(Some(previous))
    }

    /// Adds `path` to the ignored files. Returns false if it already was.
    pub fn ignore_file(&mut self, path: &Path) -> CoreResult<bool> {
        let path = absolute(path)?;
        let key = path.to_string_lossy().to_string();
        if !self.config.ignored_files.insert(key) {
            return Ok(false);
        }
        let saved = self.save_config();
        tracing::info!("Ignoring {:?}", path);
        self.history.push(UndoableAction::IgnoreFile { path });
        saved.map(|()| true)
    }

    /// Writes `next` verbatim for `path` (`None` removes the record).
    pub fn update_tracking(&mut self, path: &Path, next: Option<TrackingRecord>) -> CoreResult<()> {
        let path = absolute(path)?;
        let previous = self.store.get(&path).cloned();
        if previous == next {
            return Ok(());
        }
        let action = UndoableAction::UpdateTracking {
            path: path.clone(),
            previous: previous.clone(),
            next: next.clone(),
        };
        self.commit(&path, next, previous.as_ref(), false, action).map(drop)
    }

    /// Changes the bill month of one file. A sent file's mirrored copy moves
    /// to the submission folder of the new month.
    pub fn set_bill_month(&mut self, path: &Path, month: BillMonth) -> CoreResult<TrackingRecord> {
        let path = absolute(path)?;
        let previous = self.store.get(&path).cloned();
        let mut next = previous.clone().unwrap_or_default();
        next.set_bill_month(Some(month));
        let copy = self.plan_mirror(&path, &mut next, &HashMap::new()).unwrap_or(false);
        if !copy && previous.as_ref() == Some(&next) {
            return Ok(next);
        }
        let action = UndoableAction::UpdateTracking {
            path: path.clone(),
            previous: previous.clone(),
            next: Some(next.clone()),
        };
        if self.commit(&path, Some(next.clone()), previous.as_ref(), copy, action)?.is_some() {
            next.set_mirrored_path(None);
        }
        Ok(next)
    }

    pub fn undo(&mut self) -> CoreResult<Option<UndoableAction>> {
        let Some(action) = self.history.undo() else {
            return Ok(None);
        };
        let applied = match &action {
            UndoableAction::MarkSent { path, previous, .. } => {
                self.restore_record(path, previous.clone())
            }
            UndoableAction::MarkPending { path, previous } => {
                self.restore_record(path, Some(previous.clone()))
            }
            UndoableAction::IgnoreFile { path } => self.set_file_ignored(path, false),
            UndoableAction::UpdateTracking { path, previous, .. } => {
                self.restore_record(path, previous.clone())
            }
        };
        match applied {
            Ok(()) => {
                tracing::info!("Undid {}", action.describe());
                Ok(Some(action))
            }
            Err(e) => {
                self.history.revert_undo();
                Err(e)
            }
        }
    }

    pub fn redo(&mut self) -> CoreResult<Option<UndoableAction>> {
        let Some(action) = self.history.redo() else {
            return Ok(None);
        };
        let applied = match &action {
            UndoableAction::MarkSent { path, record, .. } => {
                self.restore_record(path, Some(record.clone()))
            }
            UndoableAction::MarkPending { path, .. } => self.restore_record(path, None),
            UndoableAction::IgnoreFile { path } => self.set_file_ignored(path, true),
            UndoableAction::UpdateTracking { path, next, .. } => {
                self.restore_record(path, next.clone())
            }
        };
        match applied {
            Ok(()) => {
                tracing::info!("Redid {}", action.describe());
                Ok(Some(action))
            }
            Err(e) => {
                self.history.revert_redo();
                Err(e)
            }
        }
    }

    // --- Internals -----------------------------------------------------

    /// Builds the sent record for `file` and decides where its mirrored
    /// copy goes. See [`Self::plan_mirror`] for the placement result.
    pub(super) fn prepare_sent(
        &self,
        file: &TrackedFile,
        previous: Option<&TrackingRecord>,
        sent_month: BillMonth,
        sent_at: DateTime<Utc>,
        claimed: &HashMap<PathBuf, PathBuf>,
    ) -> (TrackingRecord, CoreResult<bool>) {
        let bill_month = previous
            .and_then(TrackingRecord::bill_month)
            .unwrap_or_else(|| file.bill_month());
        let mut record = previous.cloned().unwrap_or_default();
        record.set_bill_month(Some(bill_month));
        record.mark_sent(sent_month, sent_at);
        let placement = self.plan_mirror(&file.path, &mut record, claimed);
        (record, placement)
    }

    /// Points a sent `record` at the copy it should have in the submitted
    /// tree, without touching the disk. Pending records and engines without a
    /// GST root are left alone.
    ///
    /// `Ok(true)` means the copy still has to be placed. A destination that
    /// already holds the copy of another file, either on record or in
    /// `claimed` (destination to source), is shared instead of overwritten
    /// and reported as an error.
    pub(super) fn plan_mirror(
        &self,
        source: &Path,
        record: &mut TrackingRecord,
        claimed: &HashMap<PathBuf, PathBuf>,
    ) -> CoreResult<bool> {
        let Some(gst_root) = self.config.gst_submitted_root.as_deref() else {
            return Ok(false);
        };
        let (Some(sent), Some(bill)) = (record.sent_month(), record.bill_month()) else {
            return Ok(false);
        };
        let names = derive_folder_names(sent, bill);
        let wanted = match mirror::submitted_destination(source, gst_root, &names) {
            Ok(wanted) => wanted,
            Err(e) => {
                record.set_mirrored_path(None);
                return Err(e);
            }
        };
        if record.mirrored_path() == Some(wanted.as_path()) && wanted.exists() {
            tracing::debug!("Mirrored copy {:?} is already in place", wanted);
            return Ok(false);
        }

        let owner = self
            .mirror_owner(&wanted, source)
            .or_else(|| claimed.get(&wanted).filter(|owner| *owner != source).cloned());
        record.set_mirrored_path(Some(wanted.clone()));
        match owner {
            Some(owner) => {
                tracing::warn!("{:?} already holds the copy of {:?}; sharing it", wanted, owner);
                let clash = std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("already holds the copy of {}", owner.display()),
                );
                Err(CoreError::mirror(MirrorOperation::Copy, wanted, clash))
            }
            None => Ok(true),
        }
    }

    /// Another tracked file whose record points at `mirrored`.
    fn mirror_owner(&self, mirrored: &Path, except: &Path) -> Option<PathBuf> {
        self.store
            .records()
            .iter()
            .find(|(path, record)| path.as_path() != except && record.mirrored_path() == Some(mirrored))
            .map(|(path, _)| path.clone())
    }

    /// Writes a user change and records its action. Only once the write went
    /// through does the submitted tree follow. The action is recorded even
    /// when the write failed, since the change is kept in memory.
    ///
    /// Returns the copy error when the mirrored copy could not be placed; the
    /// record is then saved again without a mirrored path.
    fn commit(
        &mut self,
        path: &Path,
        record: Option<TrackingRecord>,
        previous: Option<&TrackingRecord>,
        copy: bool,
        action: UndoableAction,
    ) -> CoreResult<Option<CoreError>> {
        let plan = MirrorPlan::new(path, previous, record.as_ref(), copy);
        let written = self.store.replace(path, record);
        self.history.push(action);
        if let Err(e) = written {
            tracing::warn!("Leaving the submitted tree alone until {:?} is saved", path);
            return Err(e);
        }
        let Some(error) = self.apply_mirror(&plan) else {
            return Ok(None);
        };
        self.clear_mirrored_paths([path.to_path_buf()])?;
        Ok(Some(error))
    }

    /// Puts a record back during undo/redo. Nothing changes when the write fails.
    fn restore_record(&mut self, path: &Path, target: Option<TrackingRecord>) -> CoreResult<()> {
        let new = target.as_ref().and_then(mirrored);
        let previous = self.store.restore(path, target)?;
        let plan = MirrorPlan {
            source: path.to_path_buf(),
            old: previous.as_ref().and_then(mirrored),
            new,
            copy: false,
        };
        self.apply_mirror(&plan);
        Ok(())
    }

    /// Best effort: brings the submitted tree in line with a written change.
    /// An old copy is deleted unless another record still points at it. A
    /// copy that has gone missing is recreated. Returns the error of a
    /// requested copy that failed.
    pub(super) fn apply_mirror(&self, plan: &MirrorPlan) -> Option<CoreError> {
        let mut error = None;
        if let Some(new) = &plan.new {
            if plan.copy {
                if let Err(e) = mirror::place_copy(&plan.source, new) {
                    tracing::warn!("Could not mirror {:?}: {}", plan.source, e);
                    error = Some(e);
                }
            } else if !new.exists() && plan.source.is_file() {
                match mirror::place_copy(&plan.source, new) {
                    Ok(()) => tracing::info!("Recreated mirrored copy {:?}", new),
                    Err(e) => tracing::warn!("Could not recreate mirrored copy: {}", e),
                }
            }
        }
        if let Some(old) = plan.old.as_deref().filter(|old| Some(*old) != plan.new.as_deref()) {
            match self.mirror_owner(old, &plan.source) {
                Some(owner) => tracing::info!("Keeping {:?}, still the copy of {:?}", old, owner),
                None => {
                    self.remove_mirror(old);
                }
            }
        }
        error
    }

    /// Drops the mirrored path of records whose copy could not be placed.
    pub(super) fn clear_mirrored_paths(&mut self, paths: impl IntoIterator<Item = PathBuf>) -> CoreResult<()> {
        let changes: Vec<RecordChange> = paths
            .into_iter()
            .filter_map(|path| {
                let mut record = self.store.get(&path)?.clone();
                record.set_mirrored_path(None);
                Some(RecordChange::Put(path, record))
            })
            .collect();
        if !changes.is_empty() {
            self.store.apply(changes)?;
        }
        Ok(())
    }

    pub(super) fn remove_mirror(&self, mirrored: &Path) -> Option<CoreError> {
        let boundary = self
            .config
            .gst_submitted_root
            .as_deref()
            .or_else(|| mirrored.parent())
            .unwrap_or(mirrored);
        match mirror::delete_from_submitted_tree(mirrored, boundary) {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("Could not remove mirrored copy: {}", e);
                Some(e)
            }
        }
    }

    /// Adds or removes an ignored file without recording an action. The
    /// change is rolled back when the configuration cannot be saved.
    fn set_file_ignored(&mut self, path: &Path, ignored: bool) -> CoreResult<()> {
        let key = path.to_string_lossy().to_string();
        let changed = if ignored {
            self.config.ignored_files.insert(key.clone())
        } else {
            self.config.ignored_files.remove(&key)
        };
        if !changed {
            return Ok(());
        }
        if let Err(e) = self.save_config() {
            if ignored {
                self.config.ignored_files.remove(&key);
            } else {
                self.config.ignored_files.insert(key);
            }
            return Err(e);
        }
        Ok(())
    }
}

/// What the submitted tree needs once a record change has been written.
pub(super) struct MirrorPlan {
    source: PathBuf,
    old: Option<PathBuf>,
    new: Option<PathBuf>,
    /// Copy `source` to `new` even if something is already there.
    copy: bool,
}

impl MirrorPlan {
    pub(super) fn new(
        source: &Path,
        previous: Option<&TrackingRecord>,
        next: Option<&TrackingRecord>,
        copy: bool,
    ) -> Self {
        Self {
            source: source.to_path_buf(),
            old: previous.and_then(mirrored),
            new: next.and_then(mirrored),
            copy,
        }
    }

    pub(super) fn source(&self) -> &Path {
        &self.source
    }
}

fn mirrored(record: &TrackingRecord) -> Option<PathBuf> {
    record.mirrored_path().map(Path::to_path_buf)
}

/// Makes a path the user supplied absolute against the working directory.
/// Records, tags and ignore entries are all keyed by absolute path.
pub(super) fn absolute(path: &Path) -> CoreResult<PathBuf> {
    std::path::absolute(path).map_err(|e| {
        tracing::warn!("Cannot resolve {:?}: {}", path, e);
        CoreError::UnknownFile(path.to_path_buf())
    })
}

pub(super) fn absolute_dir(path: &Path) -> CoreResult<PathBuf> {
    std::path::absolute(path).map_err(|_| CoreError::NotADirectory(path.to_path_buf()))
}

/// Reads the metadata of a file the user pointed at.
pub(super) fn stat_bill(path: &Path) -> CoreResult<TrackedFile> {
    let folder = path.parent().unwrap_or(path);
    TrackedFile::from_path(path, folder).map_err(|e| {
        tracing::warn!("Cannot read {:?}: {}", path, e);
        CoreError::UnknownFile(path.to_path_buf())
    })
}

/// The record changes one reconciliation pass makes.
#[derive(Debug, Default)]
struct ReconcilePlan {
    changes: Vec<RecordChange>,
    updated: usize,
    removed: usize,
}

/// Decides the reconciliation changes without touching any state.
///
/// A matched file whose record does not already carry the matched
/// submission month gets a fresh sent record. A sent record of a candidate
/// with no match is deleted. Pending records and records of files outside
/// `files` are left alone.
fn plan_reconciliation(
    files: &[TrackedFile],
    matches: &[GstMatch],
    records: &TrackingMap,
    now: DateTime<Utc>,
) -> ReconcilePlan {
    let by_name: HashMap<&str, &GstMatch> =
        matches.iter().map(|m| (m.file_name.as_str(), m)).collect();
    let mut plan = ReconcilePlan::default();

    for file in files {
        let existing = records.get(&file.path);
        match by_name.get(file.name.as_str()) {
            Some(found) => {
                if existing.and_then(TrackingRecord::sent_month) == Some(found.submission_month) {
                    continue;
                }
                let bill_month = existing
                    .and_then(TrackingRecord::bill_month)
                    .unwrap_or_else(|| file.bill_month());
                let mut record = TrackingRecord::sent(Some(bill_month), found.submission_month, now);
                record.set_mirrored_path(Some(found.path.clone()));
                plan.changes.push(RecordChange::Put(file.path.clone(), record));
                plan.updated += 1;
            }
            None => {
                if existing.is_some_and(TrackingRecord::is_sent) {
                    plan.changes.push(RecordChange::Remove(file.path.clone()));
                    plan.removed += 1;
                }
            }
        }
    }
    plan
}
