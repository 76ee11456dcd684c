//! Content checksums and line-range utilities.
//!
//! All fingerprints in the core are 32-bit CRCs: cheap, collision-tolerant
//! defence-in-depth over an already capability-gated API. Range checksums
//! are computed over the exact text of a line range with separators
//! preserved as read.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::model::types::ContentHash;

/// Checksum of a byte slice.
#[must_use]
pub fn crc32(bytes: &[u8]) -> ContentHash {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    ContentHash(hasher.finalize())
}

/// Checksum of a text range (separators included, exactly as read).
#[must_use]
pub fn crc32_str(text: &str) -> ContentHash {
    crc32(text.as_bytes())
}

/// Streaming checksum of a file's bytes.
///
/// # Errors
/// Propagates I/O failures; callers that want the absent-file sentinel use
/// [`hash_file_or_zero`].
pub fn crc32_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ContentHash(hasher.finalize()))
}

/// Checksum of a file, or [`ContentHash::ZERO`] when the file is absent or
/// unreadable.
#[must_use]
pub fn hash_file_or_zero(path: &Path) -> ContentHash {
    crc32_file(path).unwrap_or(ContentHash::ZERO)
}

/// Split text into lines with their separators preserved.
///
/// `"x\ny"` → `["x\n", "y"]`; the empty string has no lines.
#[must_use]
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// 1-based line count of a text. The empty string has zero lines; a trailing
/// newline does not open a new line.
#[must_use]
pub fn line_count(text: &str) -> u32 {
    u32::try_from(text.split_inclusive('\n').count()).unwrap_or(u32::MAX)
}

/// Extract the exact text of the 1-based inclusive range `[start, end]`,
/// separators preserved. Returns `None` when the range falls outside the
/// text or is inverted.
#[must_use]
pub fn extract_range(text: &str, start: u32, end: u32) -> Option<String> {
    if start == 0 || end < start {
        return None;
    }
    let lines = split_lines(text);
    let start_idx = (start - 1) as usize;
    let end_idx = end as usize;
    if end_idx > lines.len() {
        return None;
    }
    Some(lines[start_idx..end_idx].concat())
}
