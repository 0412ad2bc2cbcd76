//! Parse collected response header lines into a status and header map.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

use crate::error::{FetchError, FetchResult};

/// Parses raw header lines as collected by curl's header callback.
///
/// Each `HTTP/` status line starts a new block (interim `100 Continue`
/// answers and the like); only the last block is kept. Lines that are not
/// valid header text are skipped.
pub fn parse_response_head(lines: &[String]) -> FetchResult<(StatusCode, HeaderMap)> {
    let mut status = None;
    let mut headers = HeaderMap::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            let code = line
                .split_whitespace()
                .nth(1)
                .and_then(|c| c.parse::<u16>().ok())
                .and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or_else(|| FetchError::transport(format!("bad status line: {}", line)))?;
            status = Some(code);
            headers.clear();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let Ok(name) = HeaderName::from_bytes(name.trim().as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value.trim()) else {
                continue;
            };
            headers.append(name, value);
        }
    }

    let status = status.ok_or_else(|| FetchError::transport("response without status line"))?;
    Ok((status, headers))
}
