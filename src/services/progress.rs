//! Periodic progress display.
//!
//! While a long stage runs, the reporter alternates between the stage's
//! status text and a percentage computed from the shared [`ProgressState`]:
//! status for ~2s, percent for ~4s (refreshed every tick), then back to the
//! status text. It runs as its own tokio task so a stage blocked on I/O does
//! not freeze the display.

use crate::models::{BuilderSettings, ProgressState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

/// Where the reporter writes the text it wants displayed
pub trait StatusSink: Send + Sync {
    fn show(&self, text: &str);
}

/// Reporter cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterTiming {
    /// How long the status text stays up
    pub status_dwell: Duration,
    /// How long the percentage stays up
    pub percent_window: Duration,
    /// Refresh and stop-check interval
    pub tick: Duration,
}

impl Default for ReporterTiming {
    fn default() -> Self {
        Self {
            status_dwell: Duration::from_millis(2000),
            percent_window: Duration::from_millis(4000),
            tick: Duration::from_millis(100),
        }
    }
}

impl From<&BuilderSettings> for ReporterTiming {
    fn from(settings: &BuilderSettings) -> Self {
        Self {
            status_dwell: Duration::from_millis(settings.reporter_status_ms),
            percent_window: Duration::from_millis(settings.reporter_percent_ms),
            tick: Duration::from_millis(settings.reporter_tick_ms.max(1)),
        }
    }
}

/// Handle to a running reporter task.
pub struct ProgressReporter {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// Spawn the reporter on the current runtime.
    pub fn start(
        progress: Arc<ProgressState>,
        sink: Arc<dyn StatusSink>,
        timing: ReporterTiming,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(report_loop(progress, sink, timing, stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the task and wait for it to exit.
    ///
    /// When this returns the status text has been restored and the reporter
    /// will not write again.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("Progress reporter task ended abnormally: {}", e);
        }
    }
}

async fn report_loop(
    progress: Arc<ProgressState>,
    sink: Arc<dyn StatusSink>,
    timing: ReporterTiming,
    mut stop_rx: watch::Receiver<bool>,
) {
    'cycle: loop {
        sink.show(&progress.status());

        let status_until = Instant::now() + timing.status_dwell;
        while Instant::now() < status_until {
            if wait_tick(&mut stop_rx, timing.tick).await {
                break 'cycle;
            }
        }

        let percent_until = Instant::now() + timing.percent_window;
        loop {
            sink.show(&format!("{}%", progress.percent()));
            if wait_tick(&mut stop_rx, timing.tick).await {
                break 'cycle;
            }
            if Instant::now() >= percent_until {
                break;
            }
        }
    }

    sink.show(&progress.status());
}

/// Sleep one tick. Returns true once a stop has been requested.
async fn wait_tick(stop_rx: &mut watch::Receiver<bool>, tick: Duration) -> bool {
    if *stop_rx.borrow() {
        return true;
    }
    tokio::select! {
        _ = sleep(tick) => *stop_rx.borrow(),
        changed = stop_rx.changed() => changed.is_err() || *stop_rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        shown: Mutex<Vec<String>>,
    }

    impl StatusSink for RecordingSink {
        fn show(&self, text: &str) {
            self.shown.lock().unwrap().push(text.to_string());
        }
    }

    impl RecordingSink {
        fn shown(&self) -> Vec<String> {
            self.shown.lock().unwrap().clone()
        }
    }

    fn fast_timing() -> ReporterTiming {
        ReporterTiming {
            status_dwell: Duration::from_millis(30),
            percent_window: Duration::from_millis(60),
            tick: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_reporter_alternates_status_and_percent() {
        let progress = Arc::new(ProgressState::new());
        progress.set_status("Extracting");
        progress.reset(200);
        progress.set_current(50);

        let sink = Arc::new(RecordingSink::default());
        let reporter = ProgressReporter::start(progress.clone(), sink.clone(), fast_timing());

        sleep(Duration::from_millis(250)).await;
        reporter.stop().await;

        let shown = sink.shown();
        assert_eq!(shown.first().map(String::as_str), Some("Extracting"));
        assert!(shown.iter().any(|s| s == "25%"));
        assert_eq!(shown.last().map(String::as_str), Some("Extracting"));

        // Status shows up again after the first percent window
        let first_percent = shown.iter().position(|s| s == "25%").unwrap();
        assert!(shown[first_percent..].iter().filter(|s| *s == "Extracting").count() >= 2);
    }

    #[tokio::test]
    async fn test_reporter_rereads_counters() {
        let progress = Arc::new(ProgressState::new());
        progress.set_status("Copying");
        let sink = Arc::new(RecordingSink::default());
        let timing = ReporterTiming {
            status_dwell: Duration::from_millis(10),
            percent_window: Duration::from_secs(5),
            tick: Duration::from_millis(10),
        };
        let reporter = ProgressReporter::start(progress.clone(), sink.clone(), timing);

        sleep(Duration::from_millis(60)).await;
        progress.set_current(70);
        sleep(Duration::from_millis(60)).await;
        reporter.stop().await;

        let shown = sink.shown();
        assert!(shown.iter().any(|s| s == "0%"));
        assert!(shown.iter().any(|s| s == "70%"));
    }

    #[tokio::test]
    async fn test_stop_is_prompt() {
        let progress = Arc::new(ProgressState::new());
        progress.set_status("Merging");
        let sink = Arc::new(RecordingSink::default());
        let timing = ReporterTiming {
            status_dwell: Duration::from_secs(60),
            percent_window: Duration::from_secs(60),
            tick: Duration::from_millis(100),
        };
        let reporter = ProgressReporter::start(progress, sink.clone(), timing);
        sleep(Duration::from_millis(20)).await;

        let stopped = tokio::time::timeout(Duration::from_millis(500), reporter.stop()).await;
        assert!(stopped.is_ok());

        let count = sink.shown().len();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.shown().len(), count);
        assert_eq!(sink.shown().last().map(String::as_str), Some("Merging"));
    }

    #[test]
    fn test_timing_from_settings() {
        let mut settings = BuilderSettings::default();
        settings.reporter_tick_ms = 0;
        let timing = ReporterTiming::from(&settings);
        assert_eq!(timing.status_dwell, Duration::from_secs(2));
        assert_eq!(timing.percent_window, Duration::from_secs(4));
        assert_eq!(timing.tick, Duration::from_millis(1));
    }
}
