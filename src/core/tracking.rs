//! The durable map from bill path to its tracking record.
//!
//! `TrackingStore` is the only owner of tracking state. Every mutation is
//! persisted through a [`RecordStorage`] before it returns; a failed write
//! leaves the in-memory map updated so the caller can retry with
//! [`TrackingStore::flush`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::error::{CoreError, CoreResult};
use super::months::BillMonth;
use crate::utils::persist::{read_json, write_json};

pub type TrackingMap = BTreeMap<PathBuf, TrackingRecord>;

/// Whether a bill has been submitted. Derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Pending,
    Sent,
}

/// What we know about one bill beyond what the file system tells us.
///
/// `sent_month` and `sent_at` are only ever set or cleared together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredRecord")]
pub struct TrackingRecord {
    bill_month: Option<BillMonth>,
    sent_month: Option<BillMonth>,
    sent_at: Option<DateTime<Utc>>,
    mirrored_path: Option<PathBuf>,
}

/// The on-disk shape, accepted leniently and normalized on the way in.
#[derive(Deserialize)]
struct StoredRecord {
    #[serde(default)]
    bill_month: Option<BillMonth>,
    #[serde(default)]
    sent_month: Option<BillMonth>,
    #[serde(default)]
    sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    mirrored_path: Option<PathBuf>,
}

impl From<StoredRecord> for TrackingRecord {
    fn from(stored: StoredRecord) -> Self {
        let (sent_month, sent_at, mirrored_path) = match (stored.sent_month, stored.sent_at) {
            (Some(month), Some(at)) => (Some(month), Some(at), stored.mirrored_path),
            (None, None) => (None, None, None),
            (month, at) => {
                tracing::warn!(
                    "Dropping half-set sent marking (sent_month={:?}, sent_at={:?})",
                    month,
                    at
                );
                (None, None, None)
            }
        };
        Self {
            bill_month: stored.bill_month,
            sent_month,
            sent_at,
            mirrored_path,
        }
    }
}

impl TrackingRecord {
    /// A pending record that only remembers the bill month.
    pub fn with_bill_month(bill_month: BillMonth) -> Self {
        Self {
            bill_month: Some(bill_month),
            ..Default::default()
        }
    }

    /// A sent record.
    pub fn sent(bill_month: Option<BillMonth>, sent_month: BillMonth, sent_at: DateTime<Utc>) -> Self {
        Self {
            bill_month,
            sent_month: Some(sent_month),
            sent_at: Some(sent_at),
            mirrored_path: None,
        }
    }

    pub fn bill_month(&self) -> Option<BillMonth> {
        self.bill_month
    }

    pub fn sent_month(&self) -> Option<BillMonth> {
        self.sent_month
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn mirrored_path(&self) -> Option<&Path> {
        self.mirrored_path.as_deref()
    }

    pub fn status(&self) -> BillStatus {
        if self.sent_month.is_some() {
            BillStatus::Sent
        } else {
            BillStatus::Pending
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status() == BillStatus::Sent
    }

    /// True when the record carries no information at all.
    pub fn is_empty(&self) -> bool {
        self.bill_month.is_none() && self.sent_month.is_none() && self.mirrored_path.is_none()
    }

    pub fn set_bill_month(&mut self, bill_month: Option<BillMonth>) {
        self.bill_month = bill_month;
    }

    pub fn mark_sent(&mut self, sent_month: BillMonth, sent_at: DateTime<Utc>) {
        self.sent_month = Some(sent_month);
        self.sent_at = Some(sent_at);
    }

    /// Returns the record to pending. The mirrored copy is forgotten too.
    pub fn clear_sent(&mut self) {
        self.sent_month = None;
        self.sent_at = None;
        self.mirrored_path = None;
    }

    /// Records where the mirrored copy lives. Ignored on a pending record.
    pub fn set_mirrored_path(&mut self, mirrored_path: Option<PathBuf>) {
        if mirrored_path.is_some() && !self.is_sent() {
            tracing::debug!("Ignoring mirrored path on a pending record");
            return;
        }
        self.mirrored_path = mirrored_path;
    }

    pub fn apply_patch(&mut self, patch: &TrackingPatch) {
        if let Some(bill_month) = patch.bill_month {
            self.bill_month = bill_month;
        }
        match patch.sent {
            Some(Some((month, at))) => self.mark_sent(month, at),
            Some(None) => self.clear_sent(),
            None => {}
        }
        if let Some(mirrored_path) = &patch.mirrored_path {
            self.set_mirrored_path(mirrored_path.clone());
        }
    }
}

/// A partial update for [`TrackingStore::upsert`].
///
/// `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingPatch {
    pub bill_month: Option<Option<BillMonth>>,
    pub sent: Option<Option<(BillMonth, DateTime<Utc>)>>,
    pub mirrored_path: Option<Option<PathBuf>>,
}

impl TrackingPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bill_month(mut self, bill_month: BillMonth) -> Self {
        self.bill_month = Some(Some(bill_month));
        self
    }

    pub fn sent(mut self, sent_month: BillMonth, sent_at: DateTime<Utc>) -> Self {
        self.sent = Some(Some((sent_month, sent_at)));
        self
    }

    pub fn clear_sent(mut self) -> Self {
        self.sent = Some(None);
        self
    }

    pub fn mirrored_path(mut self, path: PathBuf) -> Self {
        self.mirrored_path = Some(Some(path));
        self
    }
}

/// One element of a batched store write.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    Put(PathBuf, TrackingRecord),
    Remove(PathBuf),
}

/// Where tracking records are persisted as one document.
pub trait RecordStorage: Send + Sync {
    fn load(&self) -> CoreResult<TrackingMap>;
    fn save(&self, records: &TrackingMap) -> CoreResult<()>;
}

/// Persists the records as a JSON object keyed by absolute file path.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStorage for JsonFileStorage {
    fn load(&self) -> CoreResult<TrackingMap> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    fn save(&self, records: &TrackingMap) -> CoreResult<()> {
        write_json(&self.path, records)?;
        tracing::debug!("Saved {} tracking records to {:?}", records.len(), self.path);
        Ok(())
    }
}

/// Keeps records in memory. Clones share the same document, and writes can be
/// made to fail on demand.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<Mutex<TrackingMap>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: TrackingMap) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
            fail_writes: Arc::default(),
        }
    }

    /// The document as last saved.
    pub fn snapshot(&self) -> TrackingMap {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl RecordStorage for MemoryStorage {
    fn load(&self) -> CoreResult<TrackingMap> {
        Ok(self.snapshot())
    }

    fn save(&self, records: &TrackingMap) -> CoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoreError::persistence(
                "<memory>",
                std::io::Error::new(std::io::ErrorKind::Other, "writes disabled"),
            ));
        }
        *self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = records.clone();
        Ok(())
    }
}

pub struct TrackingStore {
    records: TrackingMap,
    storage: Box<dyn RecordStorage>,
    dirty: bool,
}

impl std::fmt::Debug for TrackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingStore")
            .field("records", &self.records.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl TrackingStore {
    /// Opens a store and loads whatever the storage holds.
    pub fn open(storage: Box<dyn RecordStorage>) -> CoreResult<Self> {
        let records = storage.load()?;
        tracing::info!("Loaded {} tracking records", records.len());
        Ok(Self {
            records,
            storage,
            dirty: false,
        })
    }

    /// Re-reads the persisted document, discarding unsaved changes.
    pub fn load(&mut self) -> CoreResult<&TrackingMap> {
        self.records = self.storage.load()?;
        self.dirty = false;
        Ok(&self.records)
    }

    /// Replaces the whole map and persists it.
    pub fn save(&mut self, records: TrackingMap) -> CoreResult<()> {
        self.records = records;
        self.persist()
    }

    /// Retries a write that failed earlier. A no-op when nothing is pending.
    pub fn flush(&mut self) -> CoreResult<()> {
        if self.dirty {
            self.persist()
        } else {
            Ok(())
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, path: &Path) -> Option<&TrackingRecord> {
        self.records.get(path)
    }

    pub fn status(&self, path: &Path) -> BillStatus {
        self.get(path)
            .map(TrackingRecord::status)
            .unwrap_or(BillStatus::Pending)
    }

    pub fn records(&self) -> &TrackingMap {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merges `patch` into the record for `path`, creating it if needed.
    pub fn upsert(&mut self, path: &Path, patch: &TrackingPatch) -> CoreResult<TrackingRecord> {
        let record = self.records.entry(path.to_path_buf()).or_default();
        record.apply_patch(patch);
        let updated = record.clone();
        self.persist()?;
        Ok(updated)
    }

    /// Deletes the record for `path` entirely.
    pub fn remove(&mut self, path: &Path) -> CoreResult<Option<TrackingRecord>> {
        let previous = self.records.remove(path);
        if previous.is_some() {
            self.persist()?;
        }
        Ok(previous)
    }

    /// Writes `record` verbatim (or removes the entry for `None`) and returns
    /// what was there before.
    pub fn replace(
        &mut self,
        path: &Path,
        record: Option<TrackingRecord>,
    ) -> CoreResult<Option<TrackingRecord>> {
        let previous = match record {
            Some(record) => self.records.insert(path.to_path_buf(), record),
            None => self.records.remove(path),
        };
        self.persist()?;
        Ok(previous)
    }

    /// Like [`replace`](Self::replace), but a failed write also undoes the
    /// in-memory change so the map still matches the document on disk.
    pub fn restore(
        &mut self,
        path: &Path,
        record: Option<TrackingRecord>,
    ) -> CoreResult<Option<TrackingRecord>> {
        let was_dirty = self.dirty;
        let previous = match record {
            Some(record) => self.records.insert(path.to_path_buf(), record),
            None => self.records.remove(path),
        };
        if let Err(e) = self.persist() {
            match previous {
                Some(record) => self.records.insert(path.to_path_buf(), record),
                None => self.records.remove(path),
            };
            self.dirty = was_dirty;
            return Err(e);
        }
        Ok(previous)
    }

    /// Applies a batch of changes in memory and persists once.
    pub fn apply(&mut self, changes: Vec<RecordChange>) -> CoreResult<usize> {
        let count = changes.len();
        if count == 0 {
            return Ok(0);
        }
        for change in changes {
            match change {
                RecordChange::Put(path, record) => {
                    self.records.insert(path, record);
                }
                RecordChange::Remove(path) => {
                    self.records.remove(&path);
                }
            }
        }
        self.persist()?;
        Ok(count)
    }

    /// Moves a record to a new key, e.g. after the file itself was moved.
    pub fn rekey(&mut self, from: &Path, to: &Path) -> CoreResult<bool> {
        match self.records.remove(from) {
            Some(record) => {
                self.records.insert(to.to_path_buf(), record);
                self.persist()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn persist(&mut self) -> CoreResult<()> {
        match self.storage.save(&self.records) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                tracing::warn!("Tracking write failed, keeping changes in memory: {}", e);
                Err(e)
            }
        }
    }
}
