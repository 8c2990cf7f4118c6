//! Build pipeline orchestration.
//!
//! A build is a fixed sequence of [`BuildStage`]s run on one tokio task:
//!
//! 1. preflight: tool present, no stray tool processes
//! 2. code table: optional GCT analysis and patching
//! 3. extract: disc image to working tree (or reuse an existing tree)
//! 4. verify: working tree against the file manifest
//! 5. remove content: optional deletion list
//! 6. merge / pad: mod assets and variant padding
//! 7. banner: optional banner replacement
//! 8. patch executable: code-table load and game id patches
//! 9. repackage: working tree to output image
//! 10. cleanup
//!
//! Each stage yields a [`StageResult`]. `Cancel` (a declined decision or a
//! cancellation request) and `Fail` both stop the build and roll back: the
//! progress reporter is stopped and awaited, the working tree is deleted if
//! this build owns it, and the temporary code table is removed.
//!
//! Only one build runs at a time ([`MAX_CONCURRENT_BUILDS`]); a second
//! [`BuildPipeline::start`] while one is in flight fails with
//! [`BuildError::AlreadyRunning`].

pub mod decision;
mod stages;

pub use decision::{AlwaysNo, AlwaysYes, DecisionProvider, Question};

use crate::models::{BuildRequest, BuildStage, BuilderSettings, MAX_CONCURRENT_BUILDS, ProgressState};
use crate::services::code_table::{PatchTally, RuleParseError};
use crate::services::{ManifestError, MergeError, ReporterTiming, ToolError, ToolRunner};
use crate::state::StateManager;
use camino::Utf8PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;

/// Fatal build errors
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("A build is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("No source image given and no working tree at {0}")]
    NoSource(Utf8PathBuf),

    #[error("Extraction failed, {0} was not created")]
    ExtractionFailed(Utf8PathBuf),

    #[error("Build failed, {0} was not created")]
    OutputMissing(Utf8PathBuf),

    #[error("GCT file not found: {0}")]
    CodeTableMissing(Utf8PathBuf),

    #[error("Invalid patch rules: {0}")]
    Rules(#[from] RuleParseError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("Failed to remove listed files: {0}")]
    Deletion(#[from] ManifestError),

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// What a stage tells the orchestrator
#[derive(Debug)]
pub enum StageResult {
    Continue,
    Cancel,
    Fail(BuildError),
}

impl From<Result<StageResult, BuildError>> for StageResult {
    fn from(result: Result<StageResult, BuildError>) -> Self {
        result.unwrap_or_else(StageResult::Fail)
    }
}

/// Summary of a completed build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub output: Utf8PathBuf,

    /// Set when the code table was patched
    pub patch_tally: Option<PatchTally>,

    pub merged: usize,
    pub padded: usize,
    pub deleted: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub enum BuildOutcome {
    Completed(BuildReport),
    Cancelled { stage: BuildStage },
    Failed { stage: BuildStage, error: BuildError },
}

impl BuildOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, BuildOutcome::Completed(_))
    }

    /// One-line description for the console
    pub fn summary(&self) -> String {
        match self {
            BuildOutcome::Completed(report) if report.warnings.is_empty() => {
                format!("Build completed: {}", report.output)
            }
            BuildOutcome::Completed(report) => format!(
                "Build completed with {} warning(s): {}",
                report.warnings.len(),
                report.output
            ),
            BuildOutcome::Cancelled { stage } => format!("Build cancelled during {}", stage),
            BuildOutcome::Failed { stage, error } => {
                format!("Build failed during {}: {}", stage, error)
            }
        }
    }
}

/// Requests cancellation of a running build
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<watch::Sender<bool>>);

impl CancelToken {
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        let _ = self.0.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// A build running on its own task
pub struct BuildHandle {
    cancel: CancelToken,
    task: JoinHandle<BuildOutcome>,
}

impl BuildHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the build to end. Rollback has finished when this returns.
    pub async fn wait(self) -> Result<BuildOutcome, BuildError> {
        Ok(self.task.await?)
    }
}

/// Starts builds.
///
/// Holds the settings, the decision provider and the state manager every
/// build reports to.
#[derive(Clone)]
pub struct BuildPipeline {
    settings: Arc<BuilderSettings>,
    decisions: Arc<dyn DecisionProvider>,
    state: StateManager,
    semaphore: Arc<Semaphore>,
}

impl BuildPipeline {
    pub fn new(
        settings: BuilderSettings,
        decisions: Arc<dyn DecisionProvider>,
        state: StateManager,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            decisions,
            state,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_BUILDS)),
        }
    }

    pub fn settings(&self) -> &BuilderSettings {
        &self.settings
    }

    /// Spawn a build for `request` on the current runtime.
    pub fn start(&self, request: BuildRequest) -> Result<BuildHandle, BuildError> {
        let permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| BuildError::AlreadyRunning)?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let run = BuildRun::new(
            request,
            Arc::clone(&self.settings),
            Arc::clone(&self.decisions),
            self.state.clone(),
            cancel_rx,
        );

        let task = tokio::spawn(async move {
            let outcome = run.execute().await;
            drop(permit);
            outcome
        });

        Ok(BuildHandle {
            cancel: CancelToken(Arc::new(cancel_tx)),
            task,
        })
    }

    /// Start a build and wait for it
    pub async fn run(&self, request: BuildRequest) -> Result<BuildOutcome, BuildError> {
        self.start(request)?.wait().await
    }
}

const STAGES: [BuildStage; 11] = [
    BuildStage::Preflight,
    BuildStage::CodeTable,
    BuildStage::Extract,
    BuildStage::Verify,
    BuildStage::RemoveContent,
    BuildStage::Merge,
    BuildStage::Pad,
    BuildStage::Banner,
    BuildStage::PatchExecutable,
    BuildStage::Repackage,
    BuildStage::Cleanup,
];

/// State of one build in flight
pub(crate) struct BuildRun {
    request: BuildRequest,
    settings: Arc<BuilderSettings>,
    decisions: Arc<dyn DecisionProvider>,
    state: StateManager,
    progress: Arc<ProgressState>,
    cancel: watch::Receiver<bool>,
    runner: ToolRunner,
    timing: ReporterTiming,

    tree: Utf8PathBuf,
    /// Set once extraction starts or an existing tree is adopted
    tree_owned: bool,
    /// Code table the executable will load (the patched copy when patched)
    code_table: Option<Utf8PathBuf>,
    code_table_patched: bool,
    /// Mod folder was missing and the merge was skipped
    mods_skipped: bool,

    report: BuildReport,
}
