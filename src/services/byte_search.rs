//! Exact-match byte pattern search.
//!
//! [`find`] reports a first match at offset 0 as not found. Code tables always
//! start with a fixed header, so no rule pattern is expected to sit at offset 0,
//! and the loaders that consume these rules were written against that
//! behaviour. Use [`find_first`] when a true position is needed.

/// First index where `needle` occurs in `haystack`, including offset 0.
///
/// An empty needle never matches.
pub fn find_first(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }

    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// First index where `needle` occurs, with a match at offset 0 treated as not found.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    find_first(haystack, needle).filter(|&index| index > 0)
}
