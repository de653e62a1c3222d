//! Bounded undo/redo log of reversible tracking changes.
//!
//! The log only stores actions. Applying their effects is the engine's job,
//! see [`crate::core::engine::ReconciliationEngine::undo`].

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::tracking::TrackingRecord;

/// Number of actions kept on each stack.
pub const HISTORY_CAPACITY: usize = 10;

/// One user action, with everything needed to reverse and re-apply it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UndoableAction {
    MarkSent {
        path: PathBuf,
        previous: Option<TrackingRecord>,
        record: TrackingRecord,
    },
    MarkPending {
        path: PathBuf,
        previous: TrackingRecord,
    },
    IgnoreFile {
        path: PathBuf,
    },
    UpdateTracking {
        path: PathBuf,
        previous: Option<TrackingRecord>,
        next: Option<TrackingRecord>,
    },
}

impl UndoableAction {
    pub fn path(&self) -> &Path {
        match self {
            UndoableAction::MarkSent { path, .. }
            | UndoableAction::MarkPending { path, .. }
            | UndoableAction::IgnoreFile { path }
            | UndoableAction::UpdateTracking { path, .. } => path,
        }
    }

    /// Short human-readable label, e.g. for CLI output.
    pub fn describe(&self) -> String {
        let name = self
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        match self {
            UndoableAction::MarkSent { .. } => format!("mark {name} sent"),
            UndoableAction::MarkPending { .. } => format!("mark {name} pending"),
            UndoableAction::IgnoreFile { .. } => format!("ignore {name}"),
            UndoableAction::UpdateTracking { .. } => format!("update {name}"),
        }
    }
}

/// Two bounded stacks. New work invalidates the redo stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionLog {
    undo: VecDeque<UndoableAction>,
    redo: VecDeque<UndoableAction>,
    capacity: usize,
}

impl Default for ActionLog {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl ActionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            undo: VecDeque::with_capacity(capacity),
            redo: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records new work. Drops the oldest entry on overflow and clears redo.
    pub fn push(&mut self, action: UndoableAction) {
        Self::push_bounded(&mut self.undo, action, self.capacity);
        if !self.redo.is_empty() {
            tracing::debug!("Discarding {} redo entries", self.redo.len());
            self.redo.clear();
        }
    }

    /// Moves the latest action to the redo stack and returns it.
    pub fn undo(&mut self) -> Option<UndoableAction> {
        let action = self.undo.pop_back()?;
        Self::push_bounded(&mut self.redo, action.clone(), self.capacity);
        Some(action)
    }

    /// Moves the latest undone action back to the undo stack and returns it.
    pub fn redo(&mut self) -> Option<UndoableAction> {
        let action = self.redo.pop_back()?;
        Self::push_bounded(&mut self.undo, action.clone(), self.capacity);
        Some(action)
    }

    /// Reverses the last [`undo`](Self::undo) when its effect could not be applied.
    pub fn revert_undo(&mut self) {
        if let Some(action) = self.redo.pop_back() {
            Self::push_bounded(&mut self.undo, action, self.capacity);
        }
    }

    /// Reverses the last [`redo`](Self::redo) when its effect could not be applied.
    pub fn revert_redo(&mut self) {
        if let Some(action) = self.undo.pop_back() {
            Self::push_bounded(&mut self.redo, action, self.capacity);
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Number of undoable actions.
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn peek_undo(&self) -> Option<&UndoableAction> {
        self.undo.back()
    }

    pub fn peek_redo(&self) -> Option<&UndoableAction> {
        self.redo.back()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    fn push_bounded(stack: &mut VecDeque<UndoableAction>, action: UndoableAction, capacity: usize) {
        stack.push_back(action);
        while stack.len() > capacity {
            stack.pop_front();
        }
    }
}
