//! Integration tests for the GST Bill Tracker.
//!
//! Each test works on a private temporary directory holding a bill folder,
//! a GST submitted folder and the persisted documents.

use chrono::{Local, TimeZone};
use gst_bill_tracker::app::file_dialog::DialogService;
use gst_bill_tracker::app::{self, events::UserEvent, proxy::EventProxy, tasks, EngineHandle};
use gst_bill_tracker::config::{settings, AppConfig, MemoryConfigStorage};
use gst_bill_tracker::core::{
    BillMonth, BillStatus, CoreError, MemoryStorage, ReconciliationEngine, TrackingStore,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Contains the test infrastructure.
mod helpers {
    use super::*;
    use std::fs;

    /// Collects events on a tokio channel.
    #[derive(Clone)]
    pub struct TestEventProxy {
        pub sender: mpsc::UnboundedSender<UserEvent>,
    }

    impl EventProxy for TestEventProxy {
        fn send_event(&self, event: UserEvent) {
            if let Err(e) = self.sender.send(event) {
                // Panic in a test if the receiver is dropped, as it indicates a test setup error.
                panic!("Test receiver dropped: {}", e);
            }
        }
    }

    /// Answers every dialog with a fixed path.
    pub struct FakeDialog {
        pub folder: Option<PathBuf>,
    }

    impl DialogService for FakeDialog {
        fn pick_root_folder(&self) -> Option<PathBuf> {
            self.folder.clone()
        }

        fn pick_gst_root(&self) -> Option<PathBuf> {
            self.folder.clone()
        }

        fn pick_config_to_import(&self) -> Option<PathBuf> {
            None
        }

        fn export_report_path(&self) -> Option<PathBuf> {
            None
        }
    }

    /// `TestHarness` sets up a complete, isolated environment for each test case.
    pub struct TestHarness {
        pub bills: PathBuf,
        pub gst: PathBuf,
        pub data: PathBuf,
        pub proxy: TestEventProxy,
        pub event_rx: mpsc::UnboundedReceiver<UserEvent>,
        _temp_dir: TempDir,
    }

    impl TestHarness {
        pub fn new() -> Self {
            let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
            let bills = temp_dir.path().join("bills");
            let gst = temp_dir.path().join("gst");
            let data = temp_dir.path().join("data");
            for dir in [&bills, &gst, &data] {
                fs::create_dir_all(dir).expect("Failed to create dir");
            }
            let (event_tx, event_rx) = mpsc::unbounded_channel();

            Self {
                bills,
                gst,
                data,
                proxy: TestEventProxy { sender: event_tx },
                event_rx,
                _temp_dir: temp_dir,
            }
        }

        /// An engine persisting to the harness data directory, with the bill
        /// folder and GST root selected.
        pub fn engine(&self) -> ReconciliationEngine {
            let mut engine = ReconciliationEngine::open(&self.data).expect("Failed to open engine");
            engine.select_root(&self.bills).expect("Failed to select root");
            engine
                .set_gst_root(Some(self.gst.clone()))
                .expect("Failed to set GST root");
            engine
        }

        /// Creates a bill below the bill folder, last modified at noon on `date`.
        pub fn create_bill(&self, relative: &str, date: (i32, u32, u32)) -> PathBuf {
            let path = self.bills.join(relative);
            write_file(&path);
            set_modified(&path, date);
            path
        }

        /// Creates a file directly inside a submission folder.
        pub fn create_submitted(&self, year_folder: &str, submission: &str, name: &str) -> PathBuf {
            let path = self.gst.join(year_folder).join(submission).join(name);
            write_file(&path);
            path
        }

        /// Waits for the next event that isn't `SyncStarted`.
        pub async fn next_event(&mut self) -> UserEvent {
            loop {
                match tokio::time::timeout(Duration::from_secs(5), self.event_rx.recv()).await {
                    Ok(Some(UserEvent::SyncStarted)) => continue,
                    Ok(Some(event)) => return event,
                    _ => panic!("No event within timeout or channel closed"),
                }
            }
        }
    }

    pub fn write_file(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(path, b"%PDF-1.4 bill").expect("Failed to write file");
    }

    pub fn set_modified(path: &Path, (year, month, day): (i32, u32, u32)) {
        let moment = Local
            .with_ymd_and_hms(year, month, day, 12, 0, 0)
            .single()
            .expect("Ambiguous local time");
        let time = filetime::FileTime::from_unix_time(moment.timestamp(), 0);
        filetime::set_file_mtime(path, time).expect("Failed to set mtime");
    }

    pub fn month(s: &str) -> BillMonth {
        s.parse().expect("Invalid month")
    }
}

use helpers::{month, TestHarness};

const JUNE_IN_JULY: &str = "JUNE 2025 BILLS SUBMITTED IN JULY 2025";

#[tokio::test]
async fn test_mark_sent_mirrors_into_submission_folder() {
    // --- ARRANGE ---
    let harness = TestHarness::new();
    let bill = harness.create_bill("June/report.pdf", (2025, 6, 10));
    let mut engine = harness.engine();

    // --- ACT ---
    let record = engine.mark_sent(&bill, month("2025-07")).unwrap();

    // --- ASSERT ---
    let expected = harness.gst.join("2025-26").join(JUNE_IN_JULY).join("report.pdf");
    assert_eq!(record.bill_month(), Some(month("2025-06")));
    assert_eq!(record.sent_month(), Some(month("2025-07")));
    assert_eq!(record.mirrored_path(), Some(expected.as_path()));
    assert!(expected.is_file(), "Mirrored copy should exist");
    assert_eq!(engine.store().status(&bill), BillStatus::Sent);

    let statuses = engine.file_statuses().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, BillStatus::Sent);
    assert_eq!(statuses[0].bill_month, month("2025-06"));
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("June/report.pdf", (2025, 6, 10));
    harness.create_bill("June/other.pdf", (2025, 6, 12));
    let mut engine = harness.engine();
    engine.mark_sent(&bill, month("2025-07")).unwrap();
    let before = engine.store().records().clone();

    let first = engine.refresh().await.unwrap();
    let second = engine.refresh().await.unwrap();

    assert!(first.gst_checked);
    assert_eq!(first.scanned, 2);
    assert_eq!(first.changed(), 0, "A freshly marked bill needs no change");
    assert_eq!(second.changed(), 0);
    assert_eq!(engine.store().records(), &before);
}

#[tokio::test]
async fn test_refresh_drops_record_whose_copy_was_removed() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("June/report.pdf", (2025, 6, 10));
    let mut engine = harness.engine();
    let record = engine.mark_sent(&bill, month("2025-07")).unwrap();

    std::fs::remove_file(record.mirrored_path().unwrap()).unwrap();
    let report = engine.refresh().await.unwrap();

    assert_eq!(report.removed, 1);
    assert!(engine.store().get(&bill).is_none());
    assert_eq!(engine.store().status(&bill), BillStatus::Pending);
}

#[tokio::test]
async fn test_refresh_adopts_bills_found_in_gst_tree() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("May/invoice.pdf", (2025, 5, 20));
    let submitted = harness.create_submitted(
        "2025-26",
        "MAY 2025 BILLS SUBMITTED IN JUNE 2025",
        "invoice.pdf",
    );
    let mut engine = harness.engine();

    let report = engine.refresh().await.unwrap();

    assert_eq!(report.updated, 1);
    let record = engine.store().get(&bill).unwrap();
    assert_eq!(record.sent_month(), Some(month("2025-06")));
    assert_eq!(record.bill_month(), Some(month("2025-05")));
    assert_eq!(record.mirrored_path(), Some(submitted.as_path()));
}

#[tokio::test]
async fn test_later_submission_wins_for_duplicate_names() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("May/invoice.pdf", (2025, 5, 20));
    harness.create_submitted("2025-26", "MAY 2025 BILLS SUBMITTED IN JUNE 2025", "invoice.pdf");
    let later = harness.create_submitted(
        "2025-26",
        "MAY 2025 BILLS SUBMITTED IN AUGUST 2025",
        "invoice.pdf",
    );
    let mut engine = harness.engine();

    engine.refresh().await.unwrap();

    let record = engine.store().get(&bill).unwrap();
    assert_eq!(record.sent_month(), Some(month("2025-08")));
    assert_eq!(record.mirrored_path(), Some(later.as_path()));
}

#[tokio::test]
async fn test_unreadable_gst_root_changes_nothing() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("June/report.pdf", (2025, 6, 10));
    let mut engine = harness.engine();
    engine.mark_sent(&bill, month("2025-07")).unwrap();
    let before = engine.store().records().clone();

    engine
        .set_gst_root(Some(harness.gst.join("does-not-exist")))
        .unwrap();
    let result = engine.refresh().await;

    assert!(matches!(result, Err(CoreError::Match { .. })));
    assert_eq!(engine.store().records(), &before);
    assert!(!engine.is_busy(), "The busy flag must be released on error");
}

#[tokio::test]
async fn test_undo_and_redo_restore_records_and_copies() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("June/report.pdf", (2025, 6, 10));
    let mut engine = harness.engine();
    let record = engine.mark_sent(&bill, month("2025-07")).unwrap();
    let mirrored = record.mirrored_path().unwrap().to_path_buf();

    let undone = engine.undo().unwrap();
    assert!(undone.is_some());
    assert!(engine.store().get(&bill).is_none());
    assert!(!mirrored.exists(), "Undo should remove the mirrored copy");
    assert!(engine.history().can_redo());

    engine.redo().unwrap();
    assert_eq!(engine.store().get(&bill), Some(&record));
    assert!(mirrored.exists(), "Redo should recreate the mirrored copy");
    assert!(!engine.history().can_redo());
}

#[tokio::test]
async fn test_bill_month_change_moves_copy_and_undoes() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("June/report.pdf", (2025, 6, 10));
    let mut engine = harness.engine();
    let sent = engine.mark_sent(&bill, month("2025-07")).unwrap();
    let old_copy = sent.mirrored_path().unwrap().to_path_buf();

    let moved = engine.set_bill_month(&bill, month("2025-05")).unwrap();
    let new_copy = harness
        .gst
        .join("2025-26")
        .join("MAY 2025 BILLS SUBMITTED IN JULY 2025")
        .join("report.pdf");
    assert_eq!(moved.mirrored_path(), Some(new_copy.as_path()));
    assert!(new_copy.exists());
    assert!(!old_copy.exists());

    engine.undo().unwrap();
    assert_eq!(engine.store().get(&bill), Some(&sent));
    assert!(old_copy.exists());
    assert!(!new_copy.exists());
}

#[tokio::test]
async fn test_bulk_mark_sent_skips_unreadable_files() {
    let harness = TestHarness::new();
    let good = harness.create_bill("June/a.pdf", (2025, 6, 10));
    let missing = harness.bills.join("June/gone.pdf");
    let mut engine = harness.engine();

    let outcome = engine
        .bulk_mark_sent(&[good.clone(), missing.clone()], month("2025-07"))
        .unwrap();

    assert_eq!(outcome.succeeded, vec![good.clone()]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].path, missing);
    assert!(!outcome.is_complete());
    assert_eq!(engine.store().status(&good), BillStatus::Sent);
    assert!(engine.store().get(&missing).is_none());
}

#[tokio::test]
async fn test_ignored_file_leaves_listing_until_undone() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("June/report.pdf", (2025, 6, 10));
    harness.create_bill("June/keep.pdf", (2025, 6, 11));
    let mut engine = harness.engine();

    assert!(engine.ignore_file(&bill).unwrap());
    assert!(!engine.ignore_file(&bill).unwrap(), "Second ignore is a no-op");
    let names: Vec<_> = engine
        .file_statuses()
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.file.name)
        .collect();
    assert_eq!(names, vec!["keep.pdf"]);

    engine.undo().unwrap();
    assert_eq!(engine.file_statuses().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_busy_engine_refuses_second_refresh() {
    let harness = TestHarness::new();
    harness.create_bill("June/report.pdf", (2025, 6, 10));
    let mut engine = harness.engine();

    let flag = engine.busy_flag();
    flag.store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(matches!(engine.refresh().await, Err(CoreError::Busy)));
    flag.store(false, std::sync::atomic::Ordering::SeqCst);
    assert!(engine.refresh().await.is_ok());
}

#[tokio::test]
async fn test_background_sync_skips_while_reconciling() {
    let mut harness = TestHarness::new();
    let engine = harness.engine();
    let flag = engine.busy_flag();
    let handle = EngineHandle::new(engine);

    flag.store(true, std::sync::atomic::Ordering::SeqCst);
    let outcome = tasks::run_once(&handle, &harness.proxy).await;
    assert_eq!(outcome, tasks::SyncOutcome::Skipped);
    assert_eq!(harness.next_event().await, UserEvent::SyncSkipped);
}

#[tokio::test]
async fn test_unreadable_folder_is_reported_not_fatal() {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        // SAFETY: geteuid has no side effects.
        if unsafe { libc::geteuid() } == 0 {
            eprintln!("Skipping permission test: running as root");
            return;
        }

        let harness = TestHarness::new();
        harness.create_bill("June/report.pdf", (2025, 6, 10));
        let locked = harness.bills.join("June/Locked");
        harness.create_bill("June/Locked/hidden.pdf", (2025, 6, 10));
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        let mut engine = harness.engine();
        let report = engine.refresh().await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        let report = report.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.scan_errors.len(), 1);
        assert!(report.scan_errors[0].path.starts_with(&locked));
    }
}

#[tokio::test]
async fn test_select_root_folder_runs_first_sync() {
    let mut harness = TestHarness::new();
    harness.create_bill("June/report.pdf", (2025, 6, 10));
    let engine = ReconciliationEngine::new(
        AppConfig::default(),
        Box::new(MemoryConfigStorage::default()),
        TrackingStore::open(Box::new(MemoryStorage::new())).unwrap(),
    );
    let handle = EngineHandle::new(engine);
    let dialog = helpers::FakeDialog {
        folder: Some(harness.bills.clone()),
    };

    let selected = app::select_root_folder(&handle, &dialog, &harness.proxy)
        .await
        .unwrap();

    assert_eq!(selected, Some(harness.bills.clone()));
    assert_eq!(
        harness.next_event().await,
        UserEvent::RootSelected(harness.bills.clone())
    );
    match harness.next_event().await {
        UserEvent::SyncCompleted(report) => {
            assert_eq!(report.scanned, 1);
            assert!(!report.gst_checked);
        }
        other => panic!("Expected SyncCompleted, got {:?}", other),
    }
    let engine = handle.engine().lock().await;
    assert_eq!(engine.config().root_path, Some(harness.bills.clone()));
}

#[tokio::test]
async fn test_cancelled_dialog_changes_nothing() {
    let harness = TestHarness::new();
    let handle = EngineHandle::new(harness.engine());
    let dialog = helpers::FakeDialog { folder: None };

    let selected = app::select_root_folder(&handle, &dialog, &harness.proxy)
        .await
        .unwrap();

    assert!(selected.is_none());
    let engine = handle.engine().lock().await;
    assert_eq!(engine.config().root_path, Some(harness.bills.clone()));
}

#[tokio::test]
async fn test_state_survives_reopening() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("June/report.pdf", (2025, 6, 10));
    let record = {
        let mut engine = harness.engine();
        engine.add_tag(&bill, "fuel").unwrap();
        engine.mark_sent(&bill, month("2025-07")).unwrap()
    };

    let engine = ReconciliationEngine::open(&harness.data).unwrap();

    assert_eq!(engine.config().root_path, Some(harness.bills.clone()));
    assert_eq!(engine.config().gst_submitted_root, Some(harness.gst.clone()));
    assert_eq!(engine.config().tags_for(&bill), ["fuel".to_string()]);
    assert_eq!(engine.store().get(&bill), Some(&record));
}

#[tokio::test]
async fn test_move_keeps_tracking_and_delete_forgets_it() {
    let harness = TestHarness::new();
    let bill = harness.create_bill("June/report.pdf", (2025, 6, 10));
    let other = harness.create_bill("June/other.pdf", (2025, 6, 11));
    let archive = harness.bills.join("Archive");
    std::fs::create_dir_all(&archive).unwrap();
    let mut engine = harness.engine();
    let record = engine.mark_sent(&bill, month("2025-07")).unwrap();
    engine.mark_sent(&other, month("2025-07")).unwrap();

    let moved = engine.move_files(&[bill.clone()], &archive).unwrap();
    let target = archive.join("report.pdf");
    assert_eq!(moved.moved.len(), 1);
    assert_eq!(moved.moved[0].to, target);
    assert!(engine.store().get(&bill).is_none());
    assert_eq!(engine.store().get(&target), Some(&record));

    let deleted = engine.delete_files(&[other.clone()]).unwrap();
    assert_eq!(deleted.deleted, vec![other.clone()]);
    assert!(!other.exists());
    assert!(engine.store().get(&other).is_none());
}

#[tokio::test]
async fn test_shared_submitted_copy_outlives_one_pending_file() {
    let harness = TestHarness::new();
    let june = harness.create_bill("June/report.pdf", (2025, 6, 10));
    let july = harness.create_bill("July/report.pdf", (2025, 6, 20));
    let mut engine = harness.engine();

    let outcome = engine
        .bulk_mark_sent(&[june.clone(), july.clone()], month("2025-07"))
        .unwrap();
    assert_eq!(outcome.succeeded.len(), 2);
    assert_eq!(outcome.mirror_errors.len(), 1, "Second copy must not overwrite the first");
    let copy = harness.gst.join("2025-26").join(JUNE_IN_JULY).join("report.pdf");
    assert!(copy.is_file());

    engine.mark_pending(&june).unwrap();
    assert!(copy.is_file(), "Still the submitted copy of the July folder's bill");

    engine.refresh().await.unwrap();
    assert_eq!(engine.store().status(&july), BillStatus::Sent);
}

#[tokio::test]
async fn test_open_tolerates_corrupt_and_legacy_config() {
    let harness = TestHarness::new();
    let config_path = harness.data.join(settings::CONFIG_FILE);

    std::fs::write(&config_path, r#"{ "root_path": "#).unwrap();
    let engine = ReconciliationEngine::open(&harness.data).unwrap();
    assert_eq!(engine.config(), &AppConfig::default());

    let legacy = serde_json::json!({ "rootPath": harness.bills, "gstSubmittedRootPath": harness.gst });
    std::fs::write(&config_path, legacy.to_string()).unwrap();
    let engine = ReconciliationEngine::open(&harness.data).unwrap();
    assert_eq!(engine.config().root_path, Some(harness.bills.clone()));
    assert_eq!(engine.config().gst_submitted_root, Some(harness.gst.clone()));
}

mod undo_law {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        MarkSent(usize, &'static str),
        MarkPending(usize),
        SetBillMonth(usize, &'static str),
        Ignore(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        let file = 0usize..3;
        let sent = prop::sample::select(vec!["2025-07", "2025-08"]);
        let bill = prop::sample::select(vec!["2025-05", "2025-06"]);
        prop_oneof![
            (file.clone(), sent).prop_map(|(i, m)| Op::MarkSent(i, m)),
            file.clone().prop_map(Op::MarkPending),
            (file.clone(), bill).prop_map(|(i, m)| Op::SetBillMonth(i, m)),
            file.prop_map(Op::Ignore),
        ]
    }

    fn apply(engine: &mut ReconciliationEngine, files: &[PathBuf], op: &Op) {
        match op {
            Op::MarkSent(i, m) => {
                engine.mark_sent(&files[*i], month(m)).unwrap();
            }
            Op::MarkPending(i) => {
                engine.mark_pending(&files[*i]).unwrap();
            }
            Op::SetBillMonth(i, m) => {
                engine.set_bill_month(&files[*i], month(m)).unwrap();
            }
            Op::Ignore(i) => {
                engine.ignore_file(&files[*i]).unwrap();
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn undo_all_then_redo_all_round_trips(ops in prop::collection::vec(op(), 1..10)) {
            let harness = TestHarness::new();
            let files: Vec<PathBuf> = ["a.pdf", "b.pdf", "c.pdf"]
                .iter()
                .map(|name| harness.create_bill(&format!("June/{name}"), (2025, 6, 10)))
                .collect();
            let config = AppConfig {
                root_path: Some(harness.bills.clone()),
                gst_submitted_root: Some(harness.gst.clone()),
                ..Default::default()
            };
            let mut engine = ReconciliationEngine::new(
                config,
                Box::new(MemoryConfigStorage::default()),
                TrackingStore::open(Box::new(MemoryStorage::new())).unwrap(),
            );
            let initial_records = engine.store().records().clone();
            let initial_ignored = engine.config().ignored_files.clone();

            for op in &ops {
                apply(&mut engine, &files, op);
            }
            let final_records = engine.store().records().clone();
            let final_ignored = engine.config().ignored_files.clone();

            while engine.undo().unwrap().is_some() {}
            prop_assert_eq!(engine.store().records(), &initial_records);
            prop_assert_eq!(&engine.config().ignored_files, &initial_ignored);

            while engine.redo().unwrap().is_some() {}
            prop_assert_eq!(engine.store().records(), &final_records);
            prop_assert_eq!(&engine.config().ignored_files, &final_ignored);
            for record in final_records.values() {
                if let Some(copy) = record.mirrored_path() {
                    prop_assert!(copy.exists(), "Missing mirrored copy {:?}", copy);
                }
            }
        }
    }
}
