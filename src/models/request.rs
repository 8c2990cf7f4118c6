use camino::Utf8PathBuf;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default load address for the code table inside the executable.
pub const DEFAULT_CODE_OFFSET: u32 = 0x8057_0000;

/// Identifier the unmodified image ships with.
pub const STOCK_GAME_ID: &str = "RSBE01";

/// Errors produced when validating a custom game identifier
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameIdError {
    #[error("Game ID must be exactly 6 characters, got {0}")]
    Length(usize),

    #[error("Game ID code '{0}' must be 4 uppercase letters or digits")]
    Code(String),

    #[error("Game ID variant '{0}' must be 2 digits")]
    Variant(String),
}

/// A validated game identifier: 4-character code followed by a 2-digit variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GameId(String);

impl GameId {
    /// The 4-character game code (e.g. `RSBE`)
    pub fn code(&self) -> &str {
        &self.0[..4]
    }

    /// The 2-digit variant (e.g. `01`)
    pub fn variant(&self) -> &str {
        &self.0[4..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for GameId {
    type Err = GameIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 || !s.is_ascii() {
            return Err(GameIdError::Length(s.chars().count()));
        }

        let (code, variant) = s.split_at(4);
        if !code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(GameIdError::Code(code.to_string()));
        }
        if !variant.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GameIdError::Variant(variant.to_string()));
        }

        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable input bundle for a single build.
///
/// Created once when the build starts and shared read-only with every stage.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Source disc image. `None` reuses an existing working tree.
    pub source_image: Option<Utf8PathBuf>,

    /// Output image path
    pub output: Utf8PathBuf,

    /// Root of the mod assets; its first-level folders are asset categories
    pub mod_root: Option<Utf8PathBuf>,

    /// Replacement banner file
    pub banner: Option<Utf8PathBuf>,

    /// Game code table (GCT) loaded by the patched executable
    pub code_table: Option<Utf8PathBuf>,

    pub game_id: Option<GameId>,
    pub title: Option<String>,

    /// Delete base content listed in the deletion list before merging
    pub remove_base_content: bool,

    /// Ask the tool to split the output into 4 GB chunks
    pub split_output: bool,

    /// Let the tool print directly to the console instead of capturing progress
    pub show_tool_window: bool,

    /// Load address for the code table
    pub code_offset: u32,
}

impl BuildRequest {
    pub fn new(source_image: Option<Utf8PathBuf>, output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source_image,
            output: output.into(),
            mod_root: None,
            banner: None,
            code_table: None,
            game_id: None,
            title: None,
            remove_base_content: false,
            split_output: false,
            show_tool_window: false,
            code_offset: DEFAULT_CODE_OFFSET,
        }
    }

    pub fn with_mod_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.mod_root = Some(root.into());
        self
    }

    pub fn with_banner(mut self, banner: impl Into<Utf8PathBuf>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    pub fn with_code_table(mut self, gct: impl Into<Utf8PathBuf>) -> Self {
        self.code_table = Some(gct.into());
        self
    }

    pub fn with_game_id(mut self, id: GameId) -> Self {
        self.game_id = Some(id);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Whether the executable needs a patch pass at all
    pub fn needs_executable_patch(&self) -> bool {
        self.code_table.is_some() || self.game_id.is_some()
    }
}
