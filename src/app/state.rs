//! Defines the long-lived state a host keeps while it is running.

use super::proxy::EventProxy;
use super::tasks::AutoSync;
use super::EngineHandle;

/// The engine plus the background sync that follows its settings.
pub struct AppState<P: EventProxy> {
    pub handle: EngineHandle,
    proxy: P,
    auto_sync: Option<AutoSync>,
    visible: bool,
}

impl<P: EventProxy> AppState<P> {
    pub fn new(handle: EngineHandle, proxy: P) -> Self {
        Self {
            handle,
            proxy,
            auto_sync: None,
            visible: true,
        }
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.auto_sync.is_some()
    }

    /// Starts, restarts or stops periodic sync to match the current settings.
    pub async fn apply_settings(&mut self) {
        let settings = self.handle.engine().lock().await.config().settings.clone();
        let wanted = settings.auto_sync_gst.then(|| settings.sync_interval());

        match (&self.auto_sync, wanted) {
            (Some(running), Some(interval)) if running.interval() == interval => return,
            (None, None) => return,
            _ => {}
        }

        if let Some(running) = self.auto_sync.take() {
            running.stop().await;
        }
        if let Some(interval) = wanted {
            let auto_sync = AutoSync::start(self.handle.clone(), interval, self.proxy.clone());
            if !self.visible {
                auto_sync.suspend();
            }
            self.auto_sync = Some(auto_sync);
        }
    }

    /// Hidden views don't sync; showing the view again resumes the timer.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if let Some(auto_sync) = &self.auto_sync {
            if visible {
                auto_sync.resume();
            } else {
                auto_sync.suspend();
            }
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(auto_sync) = self.auto_sync.take() {
            auto_sync.stop().await;
        }
    }
}
