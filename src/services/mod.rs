//! Services module - the build pipeline's building blocks.
//!
//! Everything here is framework-agnostic: no prompts, no display, all inputs
//! are explicit parameters. The [`pipeline`](crate::pipeline) module strings
//! these together and owns every user decision.
//!
//! # Components
//!
//! - [`byte_search`]: exact-match byte pattern search
//! - [`code_table`]: rule text parsing and code-table find/replace patching
//! - [`manifest`]: post-extraction verification and deletion lists
//! - [`asset_merge`]: mod asset merge with locale-suffix handling and variant padding
//! - [`tool`]: external tool invocation, progress capture and cancellation
//! - [`progress`]: periodic status/percent display

pub mod asset_merge;
pub mod byte_search;
pub mod code_table;
pub mod manifest;
pub mod paths;
pub mod progress;
pub mod tool;

pub use asset_merge::{AssetMerger, MergeError, MergeMode, MergeSummary, PadSummary};
pub use code_table::{PatchOutcome, PatchRuleSet, PatchTally, RuleParseError};
pub use manifest::{AssetManifest, DeletionList, ManifestError, VerificationIssue};
pub use progress::{ProgressReporter, ReporterTiming, StatusSink};
pub use tool::{CodeLoad, ToolCommand, ToolError, ToolRunner};

/// Outcome of a unit of work that can be cancelled part-way
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    Done(T),
    Cancelled,
}
