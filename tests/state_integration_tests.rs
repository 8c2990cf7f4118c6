//! Integration tests for StateManager with state change events
//!
//! These tests verify that the StateManager correctly:
//! - Emits state change events on mutations
//! - Supports multiple subscribers
//! - Receives display updates from the progress reporter
//! - Handles concurrent access from multiple tasks

use brawlbuilder::models::BuildStage;
use brawlbuilder::services::{ProgressReporter, ReporterTiming};
use brawlbuilder::{ProgressState, StateChange, StateManager};
use std::sync::Arc;
use tokio::time::{Duration, sleep, timeout};

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<StateChange>) -> StateChange {
    timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed")
}

#[tokio::test]
async fn test_build_lifecycle_events() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    state.start_build();
    state.enter_stage(BuildStage::Extract);
    state.add_warning("Only 1/2 codes removed");
    state.finish_build("Build completed: out.iso");

    assert_eq!(next_event(&mut rx).await, StateChange::BuildStarted);
    assert_eq!(
        next_event(&mut rx).await,
        StateChange::StageChanged { stage: BuildStage::Extract }
    );
    assert_eq!(
        next_event(&mut rx).await,
        StateChange::DisplayChanged { text: "Extracting...".to_string() }
    );
    assert_eq!(
        next_event(&mut rx).await,
        StateChange::WarningRaised { message: "Only 1/2 codes removed".to_string() }
    );
    assert_eq!(
        next_event(&mut rx).await,
        StateChange::BuildFinished { summary: "Build completed: out.iso".to_string() }
    );
}

#[tokio::test]
async fn test_multiple_subscribers_receive_events() {
    let state = StateManager::new();
    let mut rx1 = state.subscribe();
    let mut rx2 = state.subscribe();

    state.start_build();

    assert_eq!(next_event(&mut rx1).await, StateChange::BuildStarted);
    assert_eq!(next_event(&mut rx2).await, StateChange::BuildStarted);
}

#[tokio::test]
async fn test_reporter_drives_display() {
    let state = StateManager::new();
    let mut rx = state.subscribe();

    let progress = Arc::new(ProgressState::new());
    progress.set_status("Building...");
    progress.set_current(37);

    let timing = ReporterTiming {
        status_dwell: Duration::from_millis(20),
        percent_window: Duration::from_millis(40),
        tick: Duration::from_millis(10),
    };
    let reporter = ProgressReporter::start(progress, Arc::new(state.clone()), timing);
    sleep(Duration::from_millis(150)).await;
    reporter.stop().await;

    let mut shown = Vec::new();
    while let Ok(StateChange::DisplayChanged { text }) = rx.try_recv() {
        shown.push(text);
    }

    assert_eq!(shown.first().map(String::as_str), Some("Building..."));
    assert!(shown.iter().any(|text| text == "37%"));
    assert_eq!(state.read(|s| s.display_text.clone()), "Building...");
}

#[tokio::test]
async fn test_concurrent_warnings() {
    let state = Arc::new(StateManager::new());

    let mut handles = vec![];
    for i in 0..10 {
        let state_clone = state.clone();
        handles.push(tokio::spawn(async move {
            state_clone.add_warning(format!("warning {}", i));
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(state.read(|s| s.warnings.len()), 10);
}

#[tokio::test]
async fn test_start_build_clears_previous_warnings() {
    let state = StateManager::new();
    state.start_build();
    state.add_warning("old");
    state.finish_build("done");

    state.start_build();

    let snapshot = state.snapshot();
    assert!(snapshot.is_building);
    assert!(snapshot.warnings.is_empty());
    assert_eq!(snapshot.last_result.as_deref(), Some("done"));
}
