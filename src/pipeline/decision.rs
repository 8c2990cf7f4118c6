//! User decisions requested by the pipeline.
//!
//! Every recoverable condition becomes a [`Question`] handed to a
//! [`DecisionProvider`]. The provider is synchronous and may block (the
//! console implementation reads stdin), so the pipeline calls it from a
//! blocking task.

use camino::Utf8PathBuf;
use std::fmt;

/// Something the pipeline needs a yes/no answer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Question {
    /// Tool processes are already running; kill them first?
    TerminateStrayTools { count: usize },

    /// Termination was declined; build alongside the running instances?
    ContinueWithStrayTools { count: usize },

    /// Patch rules could not be loaded; continue without code-table patching?
    RulesUnavailable { path: Utf8PathBuf, reason: String },

    /// Rules have unequal PATCH/TO counts; continue without code-table patching?
    UnbalancedRules { patches: usize, replacements: usize },

    /// The code table contains the known problem codes; apply fixes?
    ApplyCodeFixes,

    /// A working tree already exists; reuse it instead of extracting?
    ReuseWorkingTree { path: Utf8PathBuf },

    /// The verification manifest is missing or unreadable; continue unverified?
    ManifestUnavailable { path: Utf8PathBuf, reason: String },

    /// Extracted files are missing or have the wrong size; continue anyway?
    VerificationFailed { mismatches: usize },

    /// The deletion list is missing; continue without removing content?
    DeletionListMissing { path: Utf8PathBuf },

    /// The mod folder is gone; continue without merging mod files?
    ModFolderMissing { path: Utf8PathBuf },

    /// The banner file is gone; continue without a custom banner?
    BannerMissing { path: Utf8PathBuf },
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Question::TerminateStrayTools { count } => write!(
                f,
                "{} instance(s) of wit are already running. This could cause issues with the build. \
                 Kill all instances of wit before continuing?",
                count
            ),
            Question::ContinueWithStrayTools { count } => write!(
                f,
                "Continue the build with {} other instance(s) of wit running?",
                count
            ),
            Question::RulesUnavailable { path, reason } => write!(
                f,
                "{} could not be used ({}). Continue without GCT patching? \
                 If your mod is Project M 3.6 or greater, the output image may not work without it.",
                path, reason
            ),
            Question::UnbalancedRules { patches, replacements } => write!(
                f,
                "The patch rules contain {} PATCH and {} TO entries. Continue without GCT patching? \
                 If your mod is Project M 3.6 or greater, the output image may not work without it.",
                patches, replacements
            ),
            Question::ApplyCodeFixes => write!(
                f,
                "Project M 3.6 codes detected. This may cause issues with the output image. \
                 Attempt to fix known problem codes?"
            ),
            Question::ReuseWorkingTree { path } => write!(
                f,
                "There is already a {} directory. Skip the extraction and use these files instead? \
                 If you answer no, the directory will be overwritten.",
                path
            ),
            Question::ManifestUnavailable { path, reason } => write!(
                f,
                "{} could not be used ({}). Continue without verifying extracted files?",
                path, reason
            ),
            Question::VerificationFailed { mismatches } => write!(
                f,
                "{} file(s) are either missing or the wrong size in the extracted image. Continue anyway?",
                mismatches
            ),
            Question::DeletionListMissing { path } => write!(
                f,
                "{} not found. Continue without removing Subspace Emissary?",
                path
            ),
            Question::ModFolderMissing { path } => write!(
                f,
                "Mod folder {} not found. Continue without copying mod files?",
                path
            ),
            Question::BannerMissing { path } => write!(
                f,
                "Banner file {} not found. Continue without a custom banner?",
                path
            ),
        }
    }
}

/// Answers the pipeline's questions.
#[cfg_attr(test, mockall::automock)]
pub trait DecisionProvider: Send + Sync {
    /// `true` means yes
    fn confirm(&self, question: &Question) -> bool;
}

/// Answers yes to everything (`--yes`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysYes;

impl DecisionProvider for AlwaysYes {
    fn confirm(&self, question: &Question) -> bool {
        tracing::info!("Auto-accepting: {}", question);
        true
    }
}

/// Answers no to everything (`--no`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysNo;

impl DecisionProvider for AlwaysNo {
    fn confirm(&self, question: &Question) -> bool {
        tracing::info!("Auto-declining: {}", question);
        false
    }
}
