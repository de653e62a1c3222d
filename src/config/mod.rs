pub mod settings;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::CoreResult;

/// The smallest auto-sync interval we honour, whatever the config says.
const MIN_SYNC_INTERVAL_MINUTES: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// The bill folder chosen by the user. `None` until the first selection.
    pub root_path: Option<PathBuf>,
    /// Subfolders of the root that are scanned. Empty means every subfolder.
    pub selected_subfolders: BTreeSet<PathBuf>,
    pub ignored_subfolders: BTreeSet<PathBuf>,
    /// Absolute paths, bare file names or glob patterns (`*.tmp`).
    pub ignored_files: BTreeSet<String>,
    /// Root of the `<FY>/<BILL> BILLS SUBMITTED IN <SENT>/` tree.
    pub gst_submitted_root: Option<PathBuf>,
    pub settings: Settings,
    pub tags: BTreeMap<PathBuf, Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    System,
    Light,
    Dark,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub theme: Theme,
    pub auto_sync_gst: bool,
    pub sync_interval_minutes: u64,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplaySettings {
    pub show_ignored: bool,
    pub show_file_size: bool,
    pub show_dates: bool,
    pub group_by_folder: bool,
}

impl AppConfig {
    /// Loads the configuration from the platform config directory, falling
    /// back to defaults when none has been saved yet.
    pub fn load() -> Result<Self> {
        Ok(settings::load_config(None)?.unwrap_or_default())
    }

    pub fn has_root(&self) -> bool {
        self.root_path.is_some()
    }

    pub fn tags_for(&self, path: &Path) -> &[String] {
        self.tags.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut ignored_files = BTreeSet::new();
        for pattern in ["Thumbs.db", "desktop.ini", "*.tmp", "~$*"] {
            ignored_files.insert(pattern.to_string());
        }

        Self {
            root_path: None,
            selected_subfolders: BTreeSet::new(),
            ignored_subfolders: BTreeSet::new(),
            ignored_files,
            gst_submitted_root: None,
            settings: Settings::default(),
            tags: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_minutes.max(MIN_SYNC_INTERVAL_MINUTES) * 60)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            auto_sync_gst: true,
            sync_interval_minutes: 5,
            display: DisplaySettings::default(),
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_ignored: false,
            show_file_size: true,
            show_dates: true,
            group_by_folder: true,
        }
    }
}

/// Where the engine persists its configuration.
///
/// The configuration is always written as one whole document.
pub trait ConfigStorage: Send + Sync {
    fn load(&self) -> CoreResult<Option<AppConfig>>;
    fn save(&self, config: &AppConfig) -> CoreResult<()>;
}

/// Keeps the configuration in memory. Clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStorage {
    inner: Arc<Mutex<Option<AppConfig>>>,
}

impl MemoryConfigStorage {
    pub fn new(initial: Option<AppConfig>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    /// The last configuration that was saved.
    pub fn snapshot(&self) -> Option<AppConfig> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ConfigStorage for MemoryConfigStorage {
    fn load(&self) -> CoreResult<Option<AppConfig>> {
        Ok(self.snapshot())
    }

    fn save(&self, config: &AppConfig) -> CoreResult<()> {
        *self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(config.clone());
        Ok(())
    }
}
