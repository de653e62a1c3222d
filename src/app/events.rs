//! Defines the events the backend sends to whatever host shows them.

use std::path::PathBuf;

use crate::core::ReconcileReport;

/// Notifications from background work to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    /// A reconciliation is about to run.
    SyncStarted,
    /// A reconciliation finished.
    SyncCompleted(ReconcileReport),
    /// A tick was skipped because a reconciliation was already in flight.
    SyncSkipped,
    /// The user picked a new bill folder.
    RootSelected(PathBuf),
    /// `true` when periodic sync is running, `false` when suspended.
    AutoSyncStateChanged(bool),
    /// An error message to be displayed to the user.
    ShowError(String),
}
