//! Verification manifest and deletion list handling.
//!
//! The manifest lists every file the extracted tree should contain with its
//! size in bytes (`files/stage/melee/01.pac 204800`). The deletion list names
//! files under `<tree>/files` to drop when base content is removed.

use crate::services::paths::join_relative;
use camino::Utf8Path;
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Line {line}: expected '<path> <size>', got '{text}'")]
    Malformed { line: usize, text: String },

    #[error("Line {line}: invalid size '{size}'")]
    InvalidSize { line: usize, size: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: String,
    pub size: u64,
}

/// Expected contents of a freshly extracted tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetManifest {
    pub entries: Vec<ManifestEntry>,
}

/// A manifest entry that did not match the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationIssue {
    pub path: String,
    pub expected: u64,
    /// `None` when the file is missing
    pub actual: Option<u64>,
}

impl AssetManifest {
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut entries = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            // Split at the last space so paths may contain spaces
            let (path, size) = line.rsplit_once(' ').ok_or_else(|| ManifestError::Malformed {
                line: index + 1,
                text: line.to_string(),
            })?;

            let size = size
                .trim()
                .parse::<u64>()
                .map_err(|_| ManifestError::InvalidSize {
                    line: index + 1,
                    size: size.to_string(),
                })?;

            entries.push(ManifestEntry {
                path: path.trim().to_string(),
                size,
            });
        }

        Ok(Self { entries })
    }

    /// Compare the manifest against `root`, returning every missing or
    /// wrongly sized file in manifest order.
    pub fn verify(&self, root: &Utf8Path) -> Vec<VerificationIssue> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let actual = fs::metadata(join_relative(root, &entry.path))
                    .ok()
                    .filter(|meta| meta.is_file())
                    .map(|meta| meta.len());

                if actual == Some(entry.size) {
                    None
                } else {
                    tracing::debug!(
                        "Verification mismatch: {} expected {} bytes, found {:?}",
                        entry.path,
                        entry.size,
                        actual
                    );
                    Some(VerificationIssue {
                        path: entry.path.clone(),
                        expected: entry.size,
                        actual,
                    })
                }
            })
            .collect()
    }
}

/// Files to delete from the working tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionList {
    pub paths: Vec<String>,
}

impl DeletionList {
    pub fn parse(text: &str) -> Self {
        let paths = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { paths }
    }

    /// Delete every listed file under `files_root`. Absent files are skipped.
    ///
    /// # Returns
    /// The number of files actually deleted
    pub fn apply(&self, files_root: &Utf8Path) -> Result<usize, ManifestError> {
        let mut deleted = 0;

        for relative in &self.paths {
            let path = join_relative(files_root, relative);
            if path.is_file() {
                fs::remove_file(&path)?;
                deleted += 1;
            } else {
                tracing::debug!("Deletion list entry not present: {}", relative);
            }
        }

        tracing::info!("Deleted {}/{} listed files", deleted, self.paths.len());
        Ok(deleted)
    }
}
