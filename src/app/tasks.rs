//! Background reconciliation on a timer.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::events::UserEvent;
use super::proxy::EventProxy;
use super::EngineHandle;
use crate::core::{CoreError, ReconcileReport};

/// What a sync attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(ReconcileReport),
    /// Another reconciliation was in flight.
    Skipped,
    Failed(String),
}

/// Something that can be reconciled on demand.
#[async_trait]
pub trait SyncTarget: Send + Sync + 'static {
    /// True while a reconciliation is running.
    fn is_busy(&self) -> bool;

    /// Runs one reconciliation unless one is already in flight.
    async fn sync(&self) -> SyncOutcome;
}

#[async_trait]
impl SyncTarget for EngineHandle {
    fn is_busy(&self) -> bool {
        self.is_reconciling()
    }

    async fn sync(&self) -> SyncOutcome {
        // A held lock means a manual operation is running; don't queue behind it.
        let Ok(mut engine) = self.engine().try_lock() else {
            return SyncOutcome::Skipped;
        };
        match engine.refresh().await {
            Ok(report) => SyncOutcome::Completed(report),
            Err(CoreError::Busy) => SyncOutcome::Skipped,
            Err(e) => SyncOutcome::Failed(e.to_string()),
        }
    }
}

/// Runs one sync and reports it through `proxy`.
pub async fn run_once<T: SyncTarget, P: EventProxy>(target: &T, proxy: &P) -> SyncOutcome {
    if target.is_busy() {
        tracing::debug!("Sync skipped: reconciliation already running");
        proxy.send_event(UserEvent::SyncSkipped);
        return SyncOutcome::Skipped;
    }

    proxy.send_event(UserEvent::SyncStarted);
    let outcome = target.sync().await;
    match &outcome {
        SyncOutcome::Completed(report) => {
            proxy.send_event(UserEvent::SyncCompleted(report.clone()));
        }
        SyncOutcome::Skipped => {
            tracing::debug!("Sync skipped: engine is in use");
            proxy.send_event(UserEvent::SyncSkipped);
        }
        SyncOutcome::Failed(message) => {
            tracing::warn!("Background sync failed: {}", message);
            proxy.send_event(UserEvent::ShowError(message.clone()));
        }
    }
    outcome
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Suspended,
    Stopped,
}

/// Periodic sync. Ticks while suspended are dropped, and a running sync is
/// always allowed to finish before the task stops.
pub struct AutoSync {
    control: watch::Sender<Control>,
    task: JoinHandle<()>,
    interval: Duration,
}

impl AutoSync {
    /// Starts ticking every `interval`. The first sync happens one interval
    /// from now.
    pub fn start<T: SyncTarget, P: EventProxy>(target: T, interval: Duration, proxy: P) -> Self {
        let (control, receiver) = watch::channel(Control::Running);
        tracing::info!("Auto-sync every {:?}", interval);
        let task = tokio::spawn(run_loop(target, interval, proxy, receiver));
        Self {
            control,
            task,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn suspend(&self) {
        self.set(Control::Suspended);
    }

    pub fn resume(&self) {
        self.set(Control::Running);
    }

    pub fn is_suspended(&self) -> bool {
        *self.control.borrow() == Control::Suspended
    }

    /// Stops the timer and waits for an in-flight sync to finish.
    pub async fn stop(self) {
        self.set(Control::Stopped);
        if let Err(e) = self.task.await {
            tracing::warn!("Auto-sync task ended abnormally: {}", e);
        }
    }

    fn set(&self, next: Control) {
        self.control.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn run_loop<T: SyncTarget, P: EventProxy>(
    target: T,
    interval: Duration,
    proxy: P,
    mut control: watch::Receiver<Control>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *control.borrow_and_update();
                match state {
                    Control::Stopped => break,
                    Control::Suspended => {
                        tracing::info!("Auto-sync suspended");
                        proxy.send_event(UserEvent::AutoSyncStateChanged(false));
                    }
                    Control::Running => {
                        tracing::info!("Auto-sync resumed");
                        ticker.reset();
                        proxy.send_event(UserEvent::AutoSyncStateChanged(true));
                    }
                }
            }
            _ = ticker.tick() => {
                if *control.borrow() == Control::Suspended {
                    tracing::debug!("Auto-sync tick while suspended");
                    continue;
                }
                run_once(&target, &proxy).await;
            }
        }
    }
    tracing::info!("Auto-sync stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[derive(Clone, Default)]
    struct CountingTarget {
        calls: Arc<AtomicUsize>,
        running: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
        busy: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SyncTarget for CountingTarget {
        fn is_busy(&self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }

        async fn sync(&self) -> SyncOutcome {
            if self.running.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Longer than the tick interval.
            tokio::time::sleep(Duration::from_secs(90)).await;
            self.running.store(false, Ordering::SeqCst);
            SyncOutcome::Completed(ReconcileReport::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_never_overlap() {
        let target = CountingTarget::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let auto = AutoSync::start(target.clone(), Duration::from_secs(60), tx);

        tokio::time::sleep(Duration::from_secs(60 * 10)).await;
        auto.stop().await;

        assert!(target.calls.load(Ordering::SeqCst) >= 4);
        assert!(!target.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn suspended_ticks_are_dropped() {
        #[derive(Clone, Default)]
        struct Instant(Arc<AtomicUsize>);

        #[async_trait]
        impl SyncTarget for Instant {
            fn is_busy(&self) -> bool {
                false
            }
            async fn sync(&self) -> SyncOutcome {
                self.0.fetch_add(1, Ordering::SeqCst);
                SyncOutcome::Completed(ReconcileReport::default())
            }
        }

        let target = Instant::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let auto = AutoSync::start(target.clone(), Duration::from_secs(60), tx);

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 2);

        auto.suspend();
        assert!(auto.is_suspended());
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 2);

        auto.resume();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 3);
        auto.stop().await;

        let mut saw_suspend = false;
        while let Ok(event) = rx.try_recv() {
            saw_suspend |= event == UserEvent::AutoSyncStateChanged(false);
        }
        assert!(saw_suspend);
    }

    #[tokio::test]
    async fn busy_target_is_skipped() {
        let target = CountingTarget::default();
        target.busy.store(true, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome = run_once(&target, &tx).await;
        assert_eq!(outcome, SyncOutcome::Skipped);
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);
        assert_eq!(rx.try_recv().ok(), Some(UserEvent::SyncSkipped));
    }
}
