//! Path helpers shared by the verification and merge stages.
//!
//! Resource lists may use either separator, and mod assets are often authored
//! on case-insensitive filesystems, so lookups tolerate both.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Join a `/`- or `\`-separated relative path onto `base`
pub fn join_relative(base: &Utf8Path, relative: &str) -> Utf8PathBuf {
    relative
        .split(['\\', '/'])
        .filter(|segment| !segment.is_empty())
        .fold(base.to_path_buf(), |path, segment| path.join(segment))
}

/// Insert `marker` before the extension of the final path component.
///
/// `stage/melee/01.pac` with `_en` becomes `stage/melee/01_en.pac`; a file
/// without an extension gets the marker appended.
pub fn with_marker(path: &Utf8Path, marker: &str) -> Utf8PathBuf {
    let file_name = path.file_name().unwrap_or_default();
    let marked = match file_name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}{}{}", &file_name[..dot], marker, &file_name[dot..]),
        _ => format!("{}{}", file_name, marker),
    };
    path.with_file_name(marked)
}

/// Locate `path`, falling back to a case-insensitive match of its file name
/// within the same directory.
pub fn find_case_insensitive(path: &Utf8Path) -> Option<Utf8PathBuf> {
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let parent = path.parent()?;
    let target = path.file_name()?.to_lowercase();

    fs::read_dir(parent).ok()?.find_map(|entry| {
        let entry = entry.ok()?;
        let name = entry.file_name();
        let name = name.to_str()?;
        if name.to_lowercase() == target {
            Some(parent.join(name))
        } else {
            None
        }
    })
}
