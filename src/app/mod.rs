//! Host-facing glue: the shared engine handle, dialogs, events and the
//! background sync task.

pub mod events;
pub mod file_dialog;
pub mod proxy;
pub mod state;
pub mod tasks;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::{CoreResult, ReconciliationEngine};
use events::UserEvent;
use file_dialog::DialogService;
use proxy::EventProxy;

/// The engine as shared between the host and background tasks.
///
/// The busy flag is kept outside the mutex so a task can check it without
/// waiting for the lock.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Mutex<ReconciliationEngine>>,
    busy: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn new(engine: ReconciliationEngine) -> Self {
        let busy = engine.busy_flag();
        Self {
            engine: Arc::new(Mutex::new(engine)),
            busy,
        }
    }

    pub fn engine(&self) -> &Arc<Mutex<ReconciliationEngine>> {
        &self.engine
    }

    pub fn is_reconciling(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

/// Lets the user pick the bill folder, stores it and runs a first sync.
///
/// Returns `None` when the dialog was cancelled.
pub async fn select_root_folder<P: EventProxy>(
    handle: &EngineHandle,
    dialog: &dyn DialogService,
    proxy: &P,
) -> CoreResult<Option<PathBuf>> {
    let Some(path) = dialog.pick_root_folder() else {
        tracing::info!("Folder selection cancelled");
        return Ok(None);
    };

    if let Err(e) = handle.engine().lock().await.select_root(&path) {
        proxy.send_event(UserEvent::ShowError(e.to_string()));
        return Err(e);
    }
    proxy.send_event(UserEvent::RootSelected(path.clone()));
    tasks::run_once(handle, proxy).await;
    Ok(Some(path))
}

/// Lets the user pick the GST submitted folder and stores it.
pub async fn select_gst_root<P: EventProxy>(
    handle: &EngineHandle,
    dialog: &dyn DialogService,
    proxy: &P,
) -> CoreResult<Option<PathBuf>> {
    let Some(path) = dialog.pick_gst_root() else {
        return Ok(None);
    };
    if let Err(e) = handle.engine().lock().await.set_gst_root(Some(path.clone())) {
        proxy.send_event(UserEvent::ShowError(e.to_string()));
        return Err(e);
    }
    tasks::run_once(handle, proxy).await;
    Ok(Some(path))
}
