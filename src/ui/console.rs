use crate::pipeline::{DecisionProvider, Question};
use crate::state::{StateChange, StateManager};
use std::io::{self, BufRead, Write};
use std::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Interpret a typed answer; anything but yes is no
pub fn parse_answer(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Asks questions on stdout and reads `y`/`n` from stdin.
///
/// Questions are serialized so two prompts never interleave.
#[derive(Debug, Default)]
pub struct ConsolePrompt {
    lock: Mutex<()>,
}

impl ConsolePrompt {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecisionProvider for ConsolePrompt {
    fn confirm(&self, question: &Question) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut stdout = io::stdout().lock();
        if writeln!(stdout, "\n{}", question)
            .and_then(|_| write!(stdout, "[y/N] "))
            .and_then(|_| stdout.flush())
            .is_err()
        {
            return false;
        }
        drop(stdout);

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => {
                tracing::warn!("stdin closed while waiting for an answer, assuming no");
                false
            }
            Ok(_) => parse_answer(&line),
            Err(e) => {
                tracing::warn!("Failed to read answer: {}", e);
                false
            }
        }
    }
}

/// Render one event as console text, or `None` for events that print nothing
pub fn render_event(change: &StateChange) -> Option<String> {
    match change {
        StateChange::BuildStarted => Some("Build started".to_string()),
        StateChange::StageChanged { .. } => None,
        StateChange::DisplayChanged { text } => Some(format!("  {}", text)),
        StateChange::WarningRaised { message } => Some(format!("  warning: {}", message)),
        StateChange::BuildFinished { summary } => Some(summary.clone()),
    }
}

/// Print state changes until the state manager is dropped or the build ends.
pub fn spawn_event_printer(state: &StateManager) -> JoinHandle<()> {
    let mut rx = state.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    if let Some(text) = render_event(&change) {
                        println!("{}", text);
                    }
                    if matches!(change, StateChange::BuildFinished { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Event printer skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
