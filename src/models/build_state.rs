use std::fmt;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStage {
    Preflight,
    CodeTable,
    Extract,
    Verify,
    RemoveContent,
    Merge,
    Pad,
    Banner,
    PatchExecutable,
    Repackage,
    Cleanup,
}

impl BuildStage {
    /// Status text shown while the stage runs
    pub fn status_text(&self) -> &'static str {
        match self {
            BuildStage::Preflight => "Checking prerequisites...",
            BuildStage::CodeTable => "Analyzing...",
            BuildStage::Extract => "Extracting...",
            BuildStage::Verify => "Verifying...",
            BuildStage::RemoveContent => "Deleting SSE...",
            BuildStage::Merge => "Copying...",
            BuildStage::Pad => "Padding...",
            BuildStage::Banner => "Applying banner...",
            BuildStage::PatchExecutable => "Patching...",
            BuildStage::Repackage => "Building...",
            BuildStage::Cleanup => "Cleaning up...",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Preflight => "preflight",
            BuildStage::CodeTable => "code table",
            BuildStage::Extract => "extract",
            BuildStage::Verify => "verify",
            BuildStage::RemoveContent => "remove content",
            BuildStage::Merge => "merge",
            BuildStage::Pad => "pad",
            BuildStage::Banner => "banner",
            BuildStage::PatchExecutable => "patch executable",
            BuildStage::Repackage => "repackage",
            BuildStage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Display-side view of the running build.
///
/// Wrapped by [`StateManager`](crate::state::StateManager); never shared
/// directly. The pipeline's own bookkeeping lives in the pipeline, this is
/// only what a front end shows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildState {
    pub is_building: bool,
    pub current_stage: Option<BuildStage>,

    /// Text currently on screen (status or percentage)
    pub display_text: String,

    pub warnings: Vec<String>,

    /// One-line summary of the last finished build
    pub last_result: Option<String>,
}

impl BuildState {
    /// Clear everything except the last result
    pub fn reset(&mut self) {
        self.is_building = false;
        self.current_stage = None;
        self.display_text.clear();
        self.warnings.clear();
    }
}
