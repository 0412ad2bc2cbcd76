//! Byte interval type and `Range: bytes=` parsing.

use crate::error::{FetchError, FetchResult};

/// A byte interval `[start, end]` (both inclusive), as carried by `Range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "empty byte range {}-{}", start, end);
        Self { start, end }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Range` request header value: `bytes=start-end`.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// `Content-Range` response header value: `bytes start-end/total`.
    pub fn content_range_value(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parsed request `Range`: a start offset and an optional explicit end.
///
/// `end == None` is the open form `bytes=N-`, meaning "to end of resource".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    /// Span in bytes when the end is known.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|e| e.saturating_sub(self.start) + 1)
    }
}

/// Parses a single-range `Range` header value (`bytes=100-199` or `bytes=100-`).
///
/// Suffix ranges (`bytes=-500`) and multi-range lists are rejected; callers
/// forward such requests unmodified.
pub fn parse_range_header(value: &str) -> FetchResult<RangeSpec> {
    let invalid = || FetchError::InvalidHeader {
        name: "Range",
        value: value.to_string(),
    };
    let v = value.trim();
    let spec = v
        .get(..6)
        .filter(|unit| unit.eq_ignore_ascii_case("bytes="))
        .map(|_| v[6..].trim())
        .ok_or_else(invalid)?;
    if spec.contains(',') {
        return Err(invalid());
    }
    let (a, b) = spec.split_once('-').ok_or_else(invalid)?;
    let start = a.trim().parse::<u64>().map_err(|_| invalid())?;
    let b = b.trim();
    let end = if b.is_empty() {
        None
    } else {
        let end = b.parse::<u64>().map_err(|_| invalid())?;
        if end < start {
            return Err(invalid());
        }
        Some(end)
    };
    Ok(RangeSpec { start, end })
}
