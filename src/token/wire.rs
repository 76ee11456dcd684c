//! Wire form of line access tokens.
//!
//! `LAT1.<start>.<end>.<total>.<hash-hex>.<path-hex>` — every field is drawn
//! from the URL-unreserved alphabet, so tokens pass through JSON, query
//! strings, and logs untouched. The path travels hex-encoded (tool-surface
//! paths arrive as UTF-8 JSON strings), which keeps the round trip lossless
//! and the parser trivial. Tokens from another session decode fine but fail
//! validation as `NotFound` against this session's registry.

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::error::{NtsError, Result};
use crate::model::types::ContentHash;

use super::LineAccessToken;

/// Version prefix of the current encoding.
const PREFIX: &str = "LAT1";

/// Encode a token to its compact wire form.
#[must_use]
pub fn encode(token: &LineAccessToken) -> String {
    let path = token.path.to_string_lossy();
    let mut hex = String::with_capacity(path.len() * 2);
    for byte in path.as_bytes() {
        let _ = write!(hex, "{byte:02x}");
    }
    format!(
        "{PREFIX}.{}.{}.{}.{}.{hex}",
        token.start_line, token.end_line, token.total_lines, token.range_hash
    )
}

/// Decode the wire form back into a token.
///
/// # Errors
/// [`NtsError::TokenInvalidFormat`] with a reason naming the offending
/// field.
pub fn decode(s: &str) -> Result<LineAccessToken> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 6 || parts[0] != PREFIX {
        return Err(invalid(s, "expected six dot-separated fields with an LAT1 prefix"));
    }
    let start_line: u32 = parts[1]
        .parse()
        .map_err(|_| invalid(s, "start line is not a number"))?;
    let end_line: u32 = parts[2]
        .parse()
        .map_err(|_| invalid(s, "end line is not a number"))?;
    let total_lines: u32 = parts[3]
        .parse()
        .map_err(|_| invalid(s, "total line count is not a number"))?;
    let range_hash = ContentHash::from_hex(parts[4])
        .map_err(|_| invalid(s, "range checksum is not 8 hex characters"))?;
    if start_line == 0 || end_line < start_line {
        return Err(invalid(s, "line range is inverted or zero-based"));
    }
    let path = decode_hex_path(parts[5]).ok_or_else(|| invalid(s, "path is not valid hex"))?;
    Ok(LineAccessToken {
        path,
        start_line,
        end_line,
        range_hash,
        total_lines,
    })
}

fn decode_hex_path(hex: &str) -> Option<PathBuf> {
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    let raw = hex.as_bytes();
    for pair in raw.chunks(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        bytes.push(u8::try_from(hi * 16 + lo).ok()?);
    }
    String::from_utf8(bytes).ok().map(PathBuf::from)
}

fn invalid(token: &str, reason: &str) -> NtsError {
    let shown: String = token.chars().take(48).collect();
    NtsError::TokenInvalidFormat {
        token: shown,
        reason: reason.to_owned(),
    }
}
