//! Folder and file pickers used by the host.

use std::path::PathBuf;

/// Every picker returns `None` when the user cancels. Tests swap in a fake
/// that answers without opening a window.
pub trait DialogService: Send + Sync {
    /// Opens a dialog to choose the bill folder.
    fn pick_root_folder(&self) -> Option<PathBuf>;

    /// Opens a dialog to choose the GST submitted folder.
    fn pick_gst_root(&self) -> Option<PathBuf>;

    /// A previously exported configuration document.
    fn pick_config_to_import(&self) -> Option<PathBuf>;

    /// Opens a dialog to select a save location for a status report.
    fn export_report_path(&self) -> Option<PathBuf>;
}

/// Native OS dialogs through `rfd`.
pub struct NativeDialogService;

impl DialogService for NativeDialogService {
    fn pick_root_folder(&self) -> Option<PathBuf> {
        rfd::FileDialog::new()
            .set_title("Select bill folder")
            .pick_folder()
    }

    fn pick_gst_root(&self) -> Option<PathBuf> {
        rfd::FileDialog::new()
            .set_title("Select GST submitted folder")
            .pick_folder()
    }

    fn pick_config_to_import(&self) -> Option<PathBuf> {
        rfd::FileDialog::new()
            .set_title("Import configuration")
            .add_filter("Configuration", &["json"])
            .pick_file()
    }

    fn export_report_path(&self) -> Option<PathBuf> {
        let file_name = format!("bill-report_{}.json", chrono::Local::now().format("%Y%m%d"));
        rfd::FileDialog::new()
            .set_title("Export bill report")
            .add_filter("Report", &["json"])
            .set_file_name(file_name)
            .save_file()
    }
}
