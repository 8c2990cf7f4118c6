//! Data models for the BrawlBuilder pipeline.
//!
//! - [`BuildRequest`]: the immutable input bundle for one build
//! - [`GameId`]: validated custom game identifier
//! - [`BuilderSettings`]: tool and resource configuration loaded from `BrawlBuilder Config.yaml`
//! - [`BuildState`]: what a front end displays about the running build
//! - [`ProgressState`]: counters shared between the active stage and the progress reporter
//! - [`MAX_CONCURRENT_BUILDS`]: only one build may be in flight per process

pub mod build_state;
pub mod config;
pub mod progress;
pub mod request;

pub use build_state::{BuildStage, BuildState};
pub use config::BuilderSettings;
pub use progress::ProgressState;
pub use request::{BuildRequest, DEFAULT_CODE_OFFSET, GameId, GameIdError, STOCK_GAME_ID};

/// Maximum number of builds running at once.
///
/// The working tree and the temporary code table live at fixed paths, so a
/// second build would trample the first.
pub const MAX_CONCURRENT_BUILDS: usize = 1;
