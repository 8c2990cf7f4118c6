// State management module
//
// This module provides the StateManager which wraps BuildState with thread-safe access
// using Arc<RwLock<T>> and emits change events for the console front end.

use crate::models::{BuildStage, BuildState};
use crate::services::StatusSink;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Change events emitted when state is modified
///
/// These events notify interested parties (primarily the console printer)
/// about state changes without requiring them to poll the state.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A build has started
    BuildStarted,

    /// The pipeline moved on to another stage
    StageChanged { stage: BuildStage },

    /// The displayed status/percent text changed
    DisplayChanged { text: String },

    /// A non-fatal problem was recorded
    WarningRaised { message: String },

    /// The build ended (completed, cancelled or failed)
    BuildFinished { summary: String },
}

/// Thread-safe state manager with event emission
///
/// - Provides thread-safe access to [`BuildState`] via `Arc<RwLock<T>>`
/// - Detects state changes and emits [`StateChange`] events
/// - Supports subscribing to state changes via tokio broadcast channels
///
/// Writers are the pipeline (stage changes, warnings) and the
/// [`ProgressReporter`](crate::services::ProgressReporter) through
/// [`StatusSink`].
pub struct StateManager {
    state: Arc<RwLock<BuildState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Create a new StateManager with default state and a 100 event buffer
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(BuildState::default())),
            state_tx,
        }
    }

    /// Get a cloned snapshot of the current state
    pub fn snapshot(&self) -> BuildState {
        self.state.read().unwrap().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let building = state_manager.read(|state| state.is_building);
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&BuildState) -> R,
    {
        let state = self.state.read().unwrap();
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// Captures the old state, applies `update_fn`, then emits one event per
    /// detected change. Returns the emitted events.
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut BuildState),
    {
        let mut state = self.state.write().unwrap();
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = self.detect_changes(&old_state, &state);

        for change in &changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }

        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn detect_changes(&self, old: &BuildState, new: &BuildState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.is_building != new.is_building {
            if new.is_building {
                changes.push(StateChange::BuildStarted);
            } else {
                changes.push(StateChange::BuildFinished {
                    summary: new.last_result.clone().unwrap_or_default(),
                });
            }
        }

        if old.current_stage != new.current_stage {
            if let Some(stage) = new.current_stage {
                changes.push(StateChange::StageChanged { stage });
            }
        }

        if old.display_text != new.display_text {
            changes.push(StateChange::DisplayChanged {
                text: new.display_text.clone(),
            });
        }

        if new.warnings.len() > old.warnings.len() {
            for message in &new.warnings[old.warnings.len()..] {
                changes.push(StateChange::WarningRaised {
                    message: message.clone(),
                });
            }
        }

        changes
    }

    // Convenience methods for common state updates

    pub fn start_build(&self) -> Vec<StateChange> {
        self.update(|state| {
            state.reset();
            state.is_building = true;
        })
    }

    pub fn enter_stage(&self, stage: BuildStage) -> Vec<StateChange> {
        self.update(|state| {
            state.current_stage = Some(stage);
            state.display_text = stage.status_text().to_string();
        })
    }

    pub fn set_display(&self, text: &str) -> Vec<StateChange> {
        self.update(|state| {
            if state.display_text != text {
                state.display_text = text.to_string();
            }
        })
    }

    pub fn add_warning(&self, message: impl Into<String>) -> Vec<StateChange> {
        let message = message.into();
        self.update(|state| state.warnings.push(message))
    }

    pub fn finish_build(&self, summary: impl Into<String>) -> Vec<StateChange> {
        let summary = summary.into();
        self.update(|state| {
            state.is_building = false;
            state.current_stage = None;
            state.last_result = Some(summary);
        })
    }
}

impl StatusSink for StateManager {
    fn show(&self, text: &str) {
        self.set_display(text);
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across tasks
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
