// BrawlBuilder - disc image build pipeline
//
// This is the library crate containing the pipeline, its services and data structures.
// The binary crate (main.rs) provides the console entry point.

pub mod config;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod state;
pub mod ui;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{BuildRequest, BuildStage, BuilderSettings, GameId, ProgressState};
pub use pipeline::{BuildError, BuildHandle, BuildOutcome, BuildPipeline, BuildReport};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
