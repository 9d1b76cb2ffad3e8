//! Literal match lookup against the current snapshot.

use kyodo_types::TextRange;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("match text not found in document")]
pub struct NotFound;

/// First exact occurrence of `needle` in `haystack`, as a char range.
///
/// An empty needle never matches.
pub fn locate(haystack: &str, needle: &str) -> Result<TextRange, NotFound> {
    if needle.is_empty() {
        return Err(NotFound);
    }
    let byte_start = haystack.find(needle).ok_or(NotFound)?;
    let start = haystack[..byte_start].chars().count();
    Ok(TextRange::at(start, needle.chars().count()))
}
