//! Merge mod assets into the extracted tree.
//!
//! Sources live under `<mod root>/<category>/<path>`; the category folder is
//! dropped and the file lands at `<tree>/files/<path>`. Sources are visited in
//! lexicographic order so a base asset is always handled before its
//! `_A`/`_B` variants.
//!
//! Two modes decide what happens to localized copies (`01_en.pac`) already in
//! the tree:
//! - [`MergeMode::NormalizeLocaleSuffix`]: the game loads the localized name,
//!   so an asset whose localized counterpart exists is written under that name.
//! - [`MergeMode::StripLocaleSuffix`]: the patched code table loads bare names,
//!   so the asset is written bare and the localized counterpart is deleted.
//!
//! After a strip-mode merge, [`pad_variants`] grows each base file to the size
//! of its largest variant. Variant slots are allocated at the base file's size,
//! so a base smaller than a variant would truncate it at runtime.

use crate::models::ProgressState;
use crate::services::Completion;
use crate::services::paths::{find_case_insensitive, with_marker};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Mod folder not found: {0}")]
    ModRootMissing(Utf8PathBuf),

    #[error("Failed to read mod folder: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Non UTF-8 path in mod folder: {0}")]
    NonUtf8Path(String),

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(action: &'static str, path: &Utf8Path) -> impl FnOnce(std::io::Error) -> MergeError {
    let path = path.to_path_buf();
    move |source| MergeError::Io {
        action,
        path,
        source,
    }
}

/// How localized counterparts in the tree are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    NormalizeLocaleSuffix,
    StripLocaleSuffix,
}

/// What happened to a single source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
    /// Copied to the bare destination name
    Copied(Utf8PathBuf),

    /// Copied over the localized counterpart
    CopiedLocalized(Utf8PathBuf),

    /// Copied bare and the localized counterpart removed
    CopiedStripped {
        destination: Utf8PathBuf,
        removed: Utf8PathBuf,
    },

    /// No category folder, nothing copied
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub copied: usize,
    pub localized: usize,
    pub stripped: usize,
    pub skipped: Vec<Utf8PathBuf>,
}

/// All regular files below `mod_root`, sorted by path.
pub fn collect_source_files(mod_root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, MergeError> {
    if !mod_root.is_dir() {
        return Err(MergeError::ModRootMissing(mod_root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(mod_root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8PathBuf::try_from(entry.into_path())
            .map_err(|e| MergeError::NonUtf8Path(e.into_path_buf().display().to_string()))?;
        files.push(path);
    }

    files.sort();
    Ok(files)
}

/// Path of `source` relative to `mod_root` with the category folder removed.
///
/// Returns `None` for files sitting directly in the mod root.
pub fn destination_relative(mod_root: &Utf8Path, source: &Utf8Path) -> Option<Utf8PathBuf> {
    let relative = source.strip_prefix(mod_root).ok()?;
    let mut components = relative.components();
    components.next()?;

    let rest = components.as_path();
    if rest.as_str().is_empty() {
        None
    } else {
        Some(rest.to_path_buf())
    }
}

/// Copies mod assets into `<tree>/files`
#[derive(Debug, Clone)]
pub struct AssetMerger {
    files_root: Utf8PathBuf,
    locale_marker: String,
    mode: MergeMode,
}

impl AssetMerger {
    pub fn new(files_root: impl Into<Utf8PathBuf>, locale_marker: &str, mode: MergeMode) -> Self {
        Self {
            files_root: files_root.into(),
            locale_marker: locale_marker.to_string(),
            mode,
        }
    }

    /// Merge every file in `sources`, checking `is_cancelled` after each one.
    ///
    /// `sources` must already be sorted (see [`collect_source_files`]).
    pub fn merge(
        &self,
        mod_root: &Utf8Path,
        sources: &[Utf8PathBuf],
        progress: &ProgressState,
        is_cancelled: impl Fn() -> bool,
    ) -> Result<Completion<MergeSummary>, MergeError> {
        let mut summary = MergeSummary::default();
        progress.reset(sources.len() as u64);

        for source in sources {
            match self.merge_file(mod_root, source)? {
                FileAction::Copied(_) => summary.copied += 1,
                FileAction::CopiedLocalized(_) => {
                    summary.copied += 1;
                    summary.localized += 1;
                }
                FileAction::CopiedStripped { .. } => {
                    summary.copied += 1;
                    summary.stripped += 1;
                }
                FileAction::Skipped => summary.skipped.push(source.clone()),
            }

            progress.increment();

            if is_cancelled() {
                tracing::warn!("Merge cancelled after {} files", summary.copied);
                return Ok(Completion::Cancelled);
            }
        }

        tracing::info!(
            "Merged {} files ({} localized, {} localized copies removed, {} skipped)",
            summary.copied,
            summary.localized,
            summary.stripped,
            summary.skipped.len()
        );
        Ok(Completion::Done(summary))
    }

    /// Copy a single source file into the tree.
    pub fn merge_file(
        &self,
        mod_root: &Utf8Path,
        source: &Utf8Path,
    ) -> Result<FileAction, MergeError> {
        let Some(relative) = destination_relative(mod_root, source) else {
            tracing::warn!("Skipping {}: not inside an asset category folder", source);
            return Ok(FileAction::Skipped);
        };

        let bare = self.files_root.join(&relative);
        let localized = find_case_insensitive(&with_marker(&bare, &self.locale_marker));

        if let Some(parent) = bare.parent() {
            fs::create_dir_all(parent).map_err(io_error("Failed to create directory", parent))?;
        }

        match (self.mode, localized) {
            (MergeMode::NormalizeLocaleSuffix, Some(localized)) => {
                copy_file(source, &localized)?;
                tracing::debug!("{} -> {}", source, localized);
                Ok(FileAction::CopiedLocalized(localized))
            }
            (MergeMode::StripLocaleSuffix, Some(localized)) => {
                copy_file(source, &bare)?;
                fs::remove_file(&localized)
                    .map_err(io_error("Failed to remove localized copy", &localized))?;
                tracing::debug!("{} -> {} (removed {})", source, bare, localized);
                Ok(FileAction::CopiedStripped {
                    destination: bare,
                    removed: localized,
                })
            }
            (_, None) => {
                copy_file(source, &bare)?;
                tracing::debug!("{} -> {}", source, bare);
                Ok(FileAction::Copied(bare))
            }
        }
    }
}

fn copy_file(source: &Utf8Path, destination: &Utf8Path) -> Result<(), MergeError> {
    fs::copy(source, destination).map_err(io_error("Failed to copy to", destination))?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PadSummary {
    pub padded: usize,
    pub bytes_added: u64,
}

/// Grow every base file in `dir` to the size of its largest variant.
///
/// A variant's stem ends in `_<letter>` (`01_A.pac` is a variant of `01.pac`);
/// stems and extensions are compared case-insensitively. Variants are never
/// modified. `is_cancelled` is checked after every file.
pub fn pad_variants(
    dir: &Utf8Path,
    progress: &ProgressState,
    is_cancelled: impl Fn() -> bool,
) -> Result<Completion<PadSummary>, MergeError> {
    let variant_pattern = Regex::new(r"^(?P<base>.+)_[A-Za-z]$").expect("Invalid variant regex");
    let mut summary = PadSummary::default();

    if !dir.is_dir() {
        tracing::debug!("Padding directory {} not present, nothing to pad", dir);
        return Ok(Completion::Done(summary));
    }

    let mut files: Vec<(Utf8PathBuf, u64)> = Vec::new();
    for entry in dir.read_dir_utf8().map_err(io_error("Failed to read", dir))? {
        let entry = entry.map_err(io_error("Failed to read", dir))?;
        let meta = entry
            .metadata()
            .map_err(io_error("Failed to inspect", entry.path()))?;
        if meta.is_file() {
            files.push((entry.into_path(), meta.len()));
        }
    }
    files.sort();

    // (lowercase base stem, lowercase extension) -> largest variant size
    let mut largest: HashMap<(String, String), u64> = HashMap::new();
    for (path, size) in &files {
        let (stem, ext) = stem_and_extension(path);
        if let Some(captures) = variant_pattern.captures(&stem) {
            let key = (captures["base"].to_string(), ext);
            let entry = largest.entry(key).or_insert(0);
            *entry = (*entry).max(*size);
        }
    }

    progress.reset(files.len() as u64);

    for (path, size) in &files {
        let (stem, ext) = stem_and_extension(path);

        if !variant_pattern.is_match(&stem) {
            if let Some(&target) = largest.get(&(stem, ext)) {
                if *size < target {
                    let file = fs::OpenOptions::new()
                        .write(true)
                        .open(path)
                        .map_err(io_error("Failed to open", path))?;
                    // Extending the length fills with zero bytes
                    file.set_len(target).map_err(io_error("Failed to pad", path))?;

                    tracing::debug!("Padded {} from {} to {} bytes", path, size, target);
                    summary.padded += 1;
                    summary.bytes_added += target - size;
                }
            }
        }

        progress.increment();

        if is_cancelled() {
            tracing::warn!("Padding cancelled in {}", dir);
            return Ok(Completion::Cancelled);
        }
    }

    tracing::info!(
        "Padded {} base files in {} ({} bytes added)",
        summary.padded,
        dir,
        summary.bytes_added
    );
    Ok(Completion::Done(summary))
}

fn stem_and_extension(path: &Utf8Path) -> (String, String) {
    (
        path.file_stem().unwrap_or_default().to_lowercase(),
        path.extension().unwrap_or_default().to_lowercase(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        mod_root: Utf8PathBuf,
        files_root: Utf8PathBuf,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
        let mod_root = root.join("mods");
        let files_root = root.join("ssbb.d/files");
        fs::create_dir_all(&mod_root).unwrap();
        fs::create_dir_all(&files_root).unwrap();
        Fixture {
            _temp: temp,
            mod_root,
            files_root,
        }
    }

    fn write(path: &Utf8Path, bytes: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_destination_relative() {
        let root = Utf8Path::new("/mods");
        assert_eq!(
            destination_relative(root, Utf8Path::new("/mods/pf/stage/melee/01.pac")),
            Some(Utf8PathBuf::from("stage/melee/01.pac"))
        );
        assert_eq!(destination_relative(root, Utf8Path::new("/mods/readme.txt")), None);
    }

    #[test]
    fn test_collect_sorted() {
        let fx = fixture();
        write(&fx.mod_root.join("pf/stage/melee/01_A.pac"), b"a");
        write(&fx.mod_root.join("pf/stage/melee/01.pac"), b"b");
        write(&fx.mod_root.join("module/sora.rel"), b"c");

        let files = collect_source_files(&fx.mod_root).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(&fx.mod_root).unwrap().as_str().replace('\\', "/"))
            .collect();
        assert_eq!(
            names,
            vec!["module/sora.rel", "pf/stage/melee/01.pac", "pf/stage/melee/01_A.pac"]
        );
    }

    #[test]
    fn test_collect_missing_root() {
        let fx = fixture();
        assert!(matches!(
            collect_source_files(&fx.mod_root.join("nope")),
            Err(MergeError::ModRootMissing(_))
        ));
    }

    #[test]
    fn test_normalize_mode_prefers_localized_name() {
        let fx = fixture();
        write(&fx.files_root.join("menu2/sc_title_en.pac"), b"stock");
        write(&fx.mod_root.join("pf/menu2/sc_title.pac"), b"modded");

        let merger = AssetMerger::new(&fx.files_root, "_en", MergeMode::NormalizeLocaleSuffix);
        let action = merger
            .merge_file(&fx.mod_root, &fx.mod_root.join("pf/menu2/sc_title.pac"))
            .unwrap();

        assert!(matches!(action, FileAction::CopiedLocalized(_)));
        assert_eq!(fs::read(fx.files_root.join("menu2/sc_title_en.pac")).unwrap(), b"modded");
        assert!(!fx.files_root.join("menu2/sc_title.pac").exists());
    }

    #[test]
    fn test_strip_mode_removes_localized_copy() {
        let fx = fixture();
        write(&fx.files_root.join("menu2/sc_title_en.pac"), b"stock");
        write(&fx.mod_root.join("pf/menu2/sc_title.pac"), b"modded");

        let merger = AssetMerger::new(&fx.files_root, "_en", MergeMode::StripLocaleSuffix);
        let action = merger
            .merge_file(&fx.mod_root, &fx.mod_root.join("pf/menu2/sc_title.pac"))
            .unwrap();

        assert!(matches!(action, FileAction::CopiedStripped { .. }));
        assert_eq!(fs::read(fx.files_root.join("menu2/sc_title.pac")).unwrap(), b"modded");
        assert!(!fx.files_root.join("menu2/sc_title_en.pac").exists());
    }

    #[test]
    fn test_merge_creates_directories_and_overwrites() {
        let fx = fixture();
        write(&fx.files_root.join("fighter/mario/FitMario.pac"), b"old");
        write(&fx.mod_root.join("pf/fighter/mario/FitMario.pac"), b"new");
        write(&fx.mod_root.join("pf/sound/new/track.brstm"), b"music");
        write(&fx.mod_root.join("stray.txt"), b"?");

        let sources = collect_source_files(&fx.mod_root).unwrap();
        let merger = AssetMerger::new(&fx.files_root, "_en", MergeMode::NormalizeLocaleSuffix);
        let progress = ProgressState::new();

        let summary = match merger.merge(&fx.mod_root, &sources, &progress, || false).unwrap() {
            Completion::Done(summary) => summary,
            Completion::Cancelled => panic!("merge should not be cancelled"),
        };

        assert_eq!(summary.copied, 2);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(progress.current(), 3);
        assert_eq!(fs::read(fx.files_root.join("fighter/mario/FitMario.pac")).unwrap(), b"new");
        assert!(fx.files_root.join("sound/new/track.brstm").exists());
    }

    #[test]
    fn test_merge_stops_on_cancel() {
        let fx = fixture();
        write(&fx.mod_root.join("pf/a.pac"), b"a");
        write(&fx.mod_root.join("pf/b.pac"), b"b");

        let sources = collect_source_files(&fx.mod_root).unwrap();
        let merger = AssetMerger::new(&fx.files_root, "_en", MergeMode::StripLocaleSuffix);
        let progress = ProgressState::new();

        let status = merger.merge(&fx.mod_root, &sources, &progress, || true).unwrap();
        assert_eq!(status, Completion::Cancelled);
        assert!(fx.files_root.join("a.pac").exists());
        assert!(!fx.files_root.join("b.pac").exists());
    }

    #[test]
    fn test_pad_base_to_largest_variant() {
        let fx = fixture();
        let melee = fx.files_root.join("stage/melee");
        write(&melee.join("01.pac"), &vec![7u8; 40_000]);
        write(&melee.join("01_A.pac"), &vec![1u8; 50_000]);
        write(&melee.join("01_b.PAC"), &vec![2u8; 45_000]);
        write(&melee.join("02.pac"), &vec![3u8; 10]);

        let progress = ProgressState::new();
        let summary = match pad_variants(&melee, &progress, || false).unwrap() {
            Completion::Done(summary) => summary,
            Completion::Cancelled => panic!("padding should not be cancelled"),
        };

        assert_eq!(summary.padded, 1);
        assert_eq!(summary.bytes_added, 10_000);

        let base = fs::read(melee.join("01.pac")).unwrap();
        assert_eq!(base.len(), 50_000);
        assert!(base[..40_000].iter().all(|&b| b == 7));
        assert!(base[40_000..].iter().all(|&b| b == 0));

        // Variants and unrelated files untouched
        assert_eq!(fs::metadata(melee.join("01_A.pac")).unwrap().len(), 50_000);
        assert_eq!(fs::metadata(melee.join("01_b.PAC")).unwrap().len(), 45_000);
        assert_eq!(fs::metadata(melee.join("02.pac")).unwrap().len(), 10);
    }

    #[test]
    fn test_pad_never_shrinks_base() {
        let fx = fixture();
        let melee = fx.files_root.join("stage/melee");
        write(&melee.join("03.pac"), &vec![0u8; 900]);
        write(&melee.join("03_A.pac"), &vec![0u8; 100]);

        let progress = ProgressState::new();
        pad_variants(&melee, &progress, || false).unwrap();
        assert_eq!(fs::metadata(melee.join("03.pac")).unwrap().len(), 900);
    }

    #[test]
    fn test_pad_missing_directory() {
        let fx = fixture();
        let progress = ProgressState::new();
        let status = pad_variants(&fx.files_root.join("stage/melee"), &progress, || false).unwrap();
        assert_eq!(status, Completion::Done(PadSummary::default()));
    }
}
