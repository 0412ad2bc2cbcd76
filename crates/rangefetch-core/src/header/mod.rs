//! Range header codec.
//!
//! Parses and formats `Range` (request side) and `Content-Range` (response
//! side) values. Offsets are inclusive on both ends, as on the wire.

mod content_range;
mod range;

pub use content_range::{parse_content_range_header, ContentRange};
pub use range::{parse_range_header, ByteRange, RangeSpec};
