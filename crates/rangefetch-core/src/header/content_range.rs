//! `Content-Range: bytes start-end/total` parsing.

use crate::error::{FetchError, FetchResult};

/// Parsed `Content-Range` of a partial response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
    /// Complete resource length; `None` when the server sent `*`.
    pub total: Option<u64>,
}

/// Parses a `Content-Range` header value. Unsatisfied forms (`bytes */N`) are errors.
pub fn parse_content_range_header(value: &str) -> FetchResult<ContentRange> {
    let invalid = || FetchError::InvalidHeader {
        name: "Content-Range",
        value: value.to_string(),
    };
    let v = value.trim();
    let rest = v
        .get(..6)
        .filter(|unit| unit.eq_ignore_ascii_case("bytes "))
        .map(|_| v[6..].trim())
        .ok_or_else(invalid)?;
    let (span, total) = rest.split_once('/').ok_or_else(invalid)?;
    let (a, b) = span.split_once('-').ok_or_else(invalid)?;
    let start = a.trim().parse::<u64>().map_err(|_| invalid())?;
    let end = b.trim().parse::<u64>().map_err(|_| invalid())?;
    if end < start {
        return Err(invalid());
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().map_err(|_| invalid())?),
    };
    Ok(ContentRange { start, end, total })
}
