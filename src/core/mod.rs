pub mod bulk;
pub mod engine;
pub mod error;
pub mod file_ops;
pub mod gst;
pub mod history;
pub mod ignore;
pub mod mirror;
pub mod months;
pub mod scanner;
pub mod tracking;
pub mod tree_generator;

pub use bulk::{BulkFailure, BulkOutcome};
pub use engine::{FileStatusView, ReconcileReport, ReconciliationEngine};
pub use error::{CoreError, CoreResult, MirrorOperation};
pub use gst::{derive_folder_names, parse_folder_names, FolderNames, GstMatch};
pub use history::{ActionLog, UndoableAction, HISTORY_CAPACITY};
pub use months::BillMonth;
pub use scanner::{FolderStructure, ScanFailure, ScanReport, Subfolder, TrackedFile};
pub use tracking::{
    BillStatus, JsonFileStorage, MemoryStorage, RecordChange, RecordStorage, TrackingPatch,
    TrackingRecord, TrackingStore,
};
pub use tree_generator::{TreeGenerator, TreeNode};
