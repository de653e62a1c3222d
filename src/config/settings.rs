use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{AppConfig, ConfigStorage};
use crate::core::history::ActionLog;
use crate::core::{CoreError, CoreResult};
use crate::utils::persist::{read_json, write_json};

const APP_NAME: &str = "GstBillTracker";
pub const CONFIG_FILE: &str = "config.json";
pub const TRACKING_FILE: &str = "tracking.json";
pub const HISTORY_FILE: &str = "history.json";

/// Environment variable that relocates every persisted document.
pub const HOME_ENV: &str = "BILL_TRACKER_HOME";

/// Returns the directory holding the persisted documents.
///
/// An explicit override wins, then `BILL_TRACKER_HOME`, then the
/// platform-specific configuration directory.
pub fn get_config_directory(override_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = override_dir {
        return Some(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    ProjectDirs::from("com", "gstbilltracker", APP_NAME)
        .map(|proj_dirs| proj_dirs.config_dir().to_path_buf())
}

fn config_directory(override_dir: Option<&Path>) -> Result<PathBuf> {
    get_config_directory(override_dir)
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Returns the full path to the configuration file.
pub fn get_config_file_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    get_config_directory(override_dir).map(|dir| dir.join(CONFIG_FILE))
}

/// Returns the full path to the tracking records document.
pub fn get_tracking_file_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    get_config_directory(override_dir).map(|dir| dir.join(TRACKING_FILE))
}

/// Returns the full path to the persisted undo/redo history.
pub fn get_history_file_path(override_dir: Option<&Path>) -> Option<PathBuf> {
    get_config_directory(override_dir).map(|dir| dir.join(HISTORY_FILE))
}

/// Loads the configuration, or `None` if no folder has been selected yet.
///
/// Same rules as [`JsonConfigStorage::load`].
pub fn load_config(override_dir: Option<&Path>) -> Result<Option<AppConfig>> {
    let dir = config_directory(override_dir)?;
    Ok(JsonConfigStorage::new(&dir).load()?)
}

/// Parses a stored configuration. A file written by the older app (camelCase
/// keys) is migrated. A file that cannot be parsed at all is logged and
/// treated as absent so the user can start over instead of being locked out.
fn parse_config(config_path: &Path, config_content: &str) -> Option<AppConfig> {
    match serde_json::from_str::<AppConfig>(config_content) {
        Ok(config) if !looks_legacy(config_content) => {
            tracing::info!("Loaded config from {:?}", config_path);
            Some(config)
        }
        _ => match migrate_legacy_config(config_content) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse config file at {:?}: {}. Ignoring it.",
                    config_path,
                    e
                );
                None
            }
        },
    }
}

/// Saves the provided configuration to the config file.
pub fn save_config(config: &AppConfig, override_dir: Option<&Path>) -> Result<()> {
    let config_path = config_directory(override_dir)?.join(CONFIG_FILE);
    write_json(&config_path, config)?;
    tracing::info!("Saved config to {:?}", config_path);
    Ok(())
}

/// Exports the current configuration to a user-specified JSON file.
pub fn export_config(config: &AppConfig, export_path: &Path) -> Result<()> {
    write_json(export_path, config)?;
    tracing::info!("Exported config to {:?}", export_path);
    Ok(())
}

/// Imports an application configuration from a user-specified JSON file.
pub fn import_config(import_path: &Path) -> Result<AppConfig> {
    let config_content = fs::read_to_string(import_path)
        .with_context(|| format!("Failed to read {:?}", import_path))?;
    match serde_json::from_str::<AppConfig>(&config_content) {
        Ok(config) if !looks_legacy(&config_content) => {
            tracing::info!("Imported config from {:?}", import_path);
            Ok(config)
        }
        _ => {
            tracing::info!("Importing legacy config format from {:?}", import_path);
            migrate_legacy_config(&config_content)
        }
    }
}

/// Loads the persisted action history, or an empty one.
pub fn load_history(override_dir: Option<&Path>) -> Result<ActionLog> {
    let path = config_directory(override_dir)?.join(HISTORY_FILE);
    match read_json::<ActionLog>(&path) {
        Ok(history) => Ok(history.unwrap_or_default()),
        Err(e) => {
            tracing::warn!("Discarding unreadable history at {:?}: {}", path, e);
            Ok(ActionLog::default())
        }
    }
}

pub fn save_history(history: &ActionLog, override_dir: Option<&Path>) -> Result<()> {
    let path = config_directory(override_dir)?.join(HISTORY_FILE);
    write_json(&path, history)?;
    tracing::debug!("Saved history to {:?}", path);
    Ok(())
}

/// A legacy document is recognised by its camelCase top-level keys.
fn looks_legacy(config_content: &str) -> bool {
    serde_json::from_str::<Value>(config_content)
        .ok()
        .and_then(|v| v.as_object().map(|obj| obj.contains_key("rootPath")))
        .unwrap_or(false)
}

/// Attempts to migrate a configuration written by the older app, which used
/// camelCase keys and stored the sync interval as `syncInterval`.
fn migrate_legacy_config(config_content: &str) -> Result<AppConfig> {
    let value: Value = serde_json::from_str(config_content)?;
    let legacy = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("Config is not a JSON object"))?;

    let mut migrated = Map::new();
    let renames = [
        ("rootPath", "root_path"),
        ("selectedSubfolders", "selected_subfolders"),
        ("ignoredSubfolders", "ignored_subfolders"),
        ("ignoredFiles", "ignored_files"),
        ("gstSubmittedRootPath", "gst_submitted_root"),
        ("tags", "tags"),
    ];
    for (old_key, new_key) in renames {
        match legacy.get(old_key) {
            Some(Value::Null) | None => {}
            Some(v) => {
                migrated.insert(new_key.to_string(), v.clone());
            }
        }
    }

    if let Some(old_settings) = legacy.get("settings").and_then(Value::as_object) {
        let mut settings = Map::new();
        let renames = [
            ("theme", "theme"),
            ("autoSyncGst", "auto_sync_gst"),
            ("syncInterval", "sync_interval_minutes"),
        ];
        for (old_key, new_key) in renames {
            if let Some(v) = old_settings.get(old_key).filter(|v| !v.is_null()) {
                settings.insert(new_key.to_string(), v.clone());
            }
        }
        migrated.insert("settings".to_string(), Value::Object(settings));
    }

    let migrated_config: AppConfig = serde_json::from_value(Value::Object(migrated))?;
    tracing::info!("Successfully migrated legacy config");
    Ok(migrated_config)
}

/// Persists the configuration as `config.json` in a directory.
#[derive(Debug, Clone)]
pub struct JsonConfigStorage {
    path: PathBuf,
}

impl JsonConfigStorage {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(CONFIG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStorage for JsonConfigStorage {
    fn load(&self) -> CoreResult<Option<AppConfig>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(parse_config(&self.path, &content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("No config found at {:?}", self.path);
                Ok(None)
            }
            Err(e) => Err(CoreError::persistence(&self.path, e)),
        }
    }

    fn save(&self, config: &AppConfig) -> CoreResult<()> {
        write_json(&self.path, config)?;
        tracing::info!("Saved config to {:?}", self.path);
        Ok(())
    }
}

// Platform-specific configuration paths for reference:
// macOS:   ~/Library/Application Support/com.gstbilltracker.GstBillTracker/
// Linux:   ~/.config/gstbilltracker/
// Windows: %APPDATA%/gstbilltracker/GstBillTracker/config/
