//! Rule-driven find/replace patching of a game code table (GCT).
//!
//! Rule text is line oriented:
//!
//! ```text
//! # comment
//! CHECK
//! C2 00 00 00 80 5A 00 00
//!
//! REMOVE
//! 04 00 00 00 00 00 00 00
//!
//! PATCH
//! 28 70 8F 00
//! TO
//! 28 70 8F 01
//! ```
//!
//! `CHECK`, `REMOVE`, `PATCH` and `TO` start a new entry, a blank line closes
//! it, and every other line is a hex fragment appended to the open entry.
//! The N-th `PATCH` pairs with the N-th `TO`.

use crate::services::byte_search::find;
use thiserror::Error;

/// Errors raised while reading rule text or applying a rule set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("{entry} entry #{index} has an odd number of hex digits")]
    OddLength { entry: &'static str, index: usize },

    #[error("{entry} entry #{index} contains invalid hex: {fragment}")]
    InvalidHex {
        entry: &'static str,
        index: usize,
        fragment: String,
    },

    #[error("{patches} PATCH entries but {replacements} TO entries")]
    UnbalancedPairs { patches: usize, replacements: usize },
}

/// Parsed patch rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchRuleSet {
    /// Guard sequence; only code tables containing it are patched
    pub check: Vec<u8>,
    pub remove: Vec<Vec<u8>>,
    pub patch: Vec<Vec<u8>>,
    pub to: Vec<Vec<u8>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Check,
    Remove,
    Patch,
    To,
}

impl PatchRuleSet {
    /// Parse rule text.
    ///
    /// Unequal `PATCH`/`TO` counts are not a parse error; check
    /// [`is_balanced`](Self::is_balanced) before applying.
    pub fn parse(text: &str) -> Result<Self, RuleParseError> {
        let mut section = Section::None;
        let mut check = String::new();
        let mut remove: Vec<String> = Vec::new();
        let mut patch: Vec<String> = Vec::new();
        let mut to: Vec<String> = Vec::new();

        for raw in text.lines() {
            let line = raw.trim();

            if line.starts_with('#') {
                continue;
            }

            match line {
                "CHECK" => {
                    // Only one guard; a later CHECK replaces it
                    check.clear();
                    section = Section::Check;
                    continue;
                }
                "REMOVE" => {
                    remove.push(String::new());
                    section = Section::Remove;
                    continue;
                }
                "PATCH" => {
                    patch.push(String::new());
                    section = Section::Patch;
                    continue;
                }
                "TO" => {
                    to.push(String::new());
                    section = Section::To;
                    continue;
                }
                _ => {}
            }

            if line.is_empty() {
                section = Section::None;
                continue;
            }

            let fragment: String = line.chars().filter(|c| !c.is_whitespace()).collect();
            let target = match section {
                Section::None => None,
                Section::Check => Some(&mut check),
                Section::Remove => remove.last_mut(),
                Section::Patch => patch.last_mut(),
                Section::To => to.last_mut(),
            };
            if let Some(target) = target {
                target.push_str(&fragment);
            }
        }

        Ok(Self {
            check: decode_hex(&check, "CHECK", 0)?,
            remove: decode_all(&remove, "REMOVE")?,
            patch: decode_all(&patch, "PATCH")?,
            to: decode_all(&to, "TO")?,
        })
    }

    /// Whether every `PATCH` has a matching `TO`
    pub fn is_balanced(&self) -> bool {
        self.patch.len() == self.to.len()
    }

    /// Whether the guard sequence occurs in `buffer`
    pub fn guard_matches(&self, buffer: &[u8]) -> bool {
        find(buffer, &self.check).is_some()
    }
}

fn decode_all(entries: &[String], entry: &'static str) -> Result<Vec<Vec<u8>>, RuleParseError> {
    entries
        .iter()
        .enumerate()
        .map(|(index, hex)| decode_hex(hex, entry, index))
        .collect()
}

fn decode_hex(hex: &str, entry: &'static str, index: usize) -> Result<Vec<u8>, RuleParseError> {
    if hex.len() % 2 != 0 {
        return Err(RuleParseError::OddLength { entry, index });
    }

    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(|| RuleParseError::InvalidHex {
                    entry,
                    index,
                    fragment: String::from_utf8_lossy(pair).into_owned(),
                })
        })
        .collect()
}

/// Success counts of a rule application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchTally {
    pub removed: usize,
    pub remove_attempts: usize,
    pub patched: usize,
    pub patch_attempts: usize,
}

impl PatchTally {
    /// Every remove and every patch found its pattern
    pub fn is_complete(&self) -> bool {
        self.removed == self.remove_attempts && self.patched == self.patch_attempts
    }

    pub fn summary(&self) -> String {
        format!(
            "Removed codes: {}/{}, patched codes: {}/{}",
            self.removed, self.remove_attempts, self.patched, self.patch_attempts
        )
    }
}

/// Result of running a rule set against a code table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Guard not present; the table is left as is
    NotNeeded,

    /// Guard present but the user chose not to patch
    Declined,

    Applied { buffer: Vec<u8>, tally: PatchTally },
}

/// Apply `rules` to `buffer`, asking `confirm` once the guard is found.
///
/// # Errors
///
/// Returns [`RuleParseError::UnbalancedPairs`] without touching the buffer if
/// the `PATCH`/`TO` lists differ in length.
pub fn apply(
    rules: &PatchRuleSet,
    buffer: &[u8],
    confirm: impl FnOnce() -> bool,
) -> Result<PatchOutcome, RuleParseError> {
    if !rules.is_balanced() {
        return Err(RuleParseError::UnbalancedPairs {
            patches: rules.patch.len(),
            replacements: rules.to.len(),
        });
    }

    if !rules.guard_matches(buffer) {
        tracing::debug!("Guard sequence not found, code table needs no patching");
        return Ok(PatchOutcome::NotNeeded);
    }

    if !confirm() {
        tracing::info!("Guard sequence found, patching declined");
        return Ok(PatchOutcome::Declined);
    }

    let (buffer, tally) = apply_rules(rules, buffer.to_vec());
    Ok(PatchOutcome::Applied { buffer, tally })
}

/// Run every remove, then every patch, each against the current buffer.
pub fn apply_rules(rules: &PatchRuleSet, mut buffer: Vec<u8>) -> (Vec<u8>, PatchTally) {
    let mut tally = PatchTally {
        remove_attempts: rules.remove.len(),
        patch_attempts: rules.patch.len().min(rules.to.len()),
        ..PatchTally::default()
    };

    for pattern in &rules.remove {
        if let Some(index) = find(&buffer, pattern) {
            buffer.drain(index..index + pattern.len());
            tally.removed += 1;
        }
    }

    for (pattern, replacement) in rules.patch.iter().zip(&rules.to) {
        if let Some(index) = find(&buffer, pattern) {
            buffer.splice(index..index + pattern.len(), replacement.iter().copied());
            tally.patched += 1;
        }
    }

    tracing::debug!("Code table rules applied: {}", tally.summary());
    (buffer, tally)
}
