use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Builder configuration from `BrawlBuilder Config.yaml`.
///
/// Every field has a default, so a missing file or a partial file both load.
/// Field names double as the environment override keys
/// (`BRAWLBUILDER__TOOL_PATH`, `BRAWLBUILDER__CODE_OFFSET`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderSettings {
    /// Path to the external extraction/packaging tool
    pub tool_path: String,

    /// Optional program the tool is launched through (e.g. `wine`)
    pub tool_launcher: Option<String>,

    /// Working tree produced by extraction
    pub working_dir: String,

    /// Where the patched code table is written between stages
    pub temp_gct: String,

    pub patch_rules: String,
    pub file_manifest: String,
    pub deletion_list: String,
    pub codehandler: String,
    pub patch_xml: String,

    /// Default code-load offset (hex, no prefix)
    pub code_offset: String,

    /// Load address of the code handler (hex)
    pub loader_address: String,

    /// Size of the code handler region (hex)
    pub handler_size: String,

    /// Executable address receiving the 4-character game code
    pub id_code_address: String,

    /// Executable address receiving the 2-digit variant
    pub id_variant_address: String,

    /// Marker inserted before the extension of localized assets
    pub locale_marker: String,

    /// Directories (relative to `<tree>/files`) whose base files are padded
    /// up to their largest variant
    pub padding_dirs: Vec<String>,

    /// Additional `address = hex bytes` patches applied to the executable
    pub extra_dol_patches: IndexMap<String, String>,

    pub reporter_status_ms: u64,
    pub reporter_percent_ms: u64,
    pub reporter_tick_ms: u64,

    pub debug_mode: bool,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            tool_path: default_tool_path(),
            tool_launcher: None,
            working_dir: "ssbb.d".to_string(),
            temp_gct: "Resources/temp.gct".to_string(),
            patch_rules: "Resources/ProjM36Patches.txt".to_string(),
            file_manifest: "Resources/BrawlFileList.txt".to_string(),
            deletion_list: "Resources/SubspaceEmissaryFiles.txt".to_string(),
            codehandler: "Resources/patch/codehandler.bin".to_string(),
            patch_xml: "Resources/patch/PatchCommon.xml".to_string(),
            code_offset: "80570000".to_string(),
            loader_address: "80001800".to_string(),
            handler_size: "10C0".to_string(),
            id_code_address: "805A14B0".to_string(),
            id_variant_address: "805A14B8".to_string(),
            locale_marker: "_en".to_string(),
            padding_dirs: vec!["stage/melee".to_string()],
            extra_dol_patches: IndexMap::new(),
            reporter_status_ms: 2000,
            reporter_percent_ms: 4000,
            reporter_tick_ms: 100,
            debug_mode: false,
        }
    }
}

fn default_tool_path() -> String {
    if cfg!(target_os = "windows") {
        "Resources/wit/wit.exe".to_string()
    } else {
        "Resources/wit/wit".to_string()
    }
}

impl BuilderSettings {
    /// Parse the configured code offset, accepting an optional `0x` prefix.
    pub fn code_offset_value(&self) -> Option<u32> {
        parse_hex_u32(&self.code_offset)
    }
}

/// Parse a hexadecimal `u32` with or without a `0x` prefix.
pub fn parse_hex_u32(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u32::from_str_radix(digits, 16).ok()
}
