//! HTTP message model shared by the engine and its transports.
//!
//! Requests carry no body (only `GET` is range-split). Responses carry an
//! optional body: transports that already hold the whole payload in memory
//! return [`ResponseBody::Buffered`], which the engine hands on by reference
//! instead of stream-copying it.

use std::io::{self, Read};

use bytes::{Buf, Bytes};
use http::header::{HeaderMap, HeaderName};
use http::Uri;

use crate::error::{FetchError, FetchResult};
use crate::stream::ReassemblyStream;

/// Outgoing request: method, target and headers.
pub type FetchRequest = http::Request<()>;

/// Incoming (or synthesized) response. `None` body means the transport delivered none.
pub type FetchResponse = http::Response<Option<ResponseBody>>;

/// Marks a sub-request as internal so outer layers can special-case it.
pub static X_SNOVA_HCE: HeaderName = HeaderName::from_static("x-snova-hce");

/// Logical range preserved across an upstream delegation redirect.
pub static X_RANGE: HeaderName = HeaderName::from_static("x-range");

/// Response payload.
pub enum ResponseBody {
    /// Entire payload already in memory.
    Buffered(Bytes),
    /// Payload still to be read from the transport.
    Reader(Box<dyn Read + Send>),
    /// Reassembled output of a Fetch Task.
    Reassembly(ReassemblyStream),
}

impl ResponseBody {
    /// Collects the payload. Buffered bodies are returned without copying.
    pub fn into_bytes(self) -> io::Result<Bytes> {
        match self {
            ResponseBody::Buffered(b) => Ok(b),
            ResponseBody::Reader(mut r) => {
                let mut out = Vec::new();
                r.read_to_end(&mut out)?;
                Ok(Bytes::from(out))
            }
            ResponseBody::Reassembly(mut s) => {
                let mut out = Vec::new();
                s.read_to_end(&mut out)?;
                Ok(Bytes::from(out))
            }
        }
    }

    /// Releases the body. For a reassembly stream this aborts the producer side.
    pub fn close(&mut self) {
        if let ResponseBody::Reassembly(s) = self {
            s.close();
        }
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ResponseBody::Buffered(b) => {
                let n = b.len().min(buf.len());
                buf[..n].copy_from_slice(&b[..n]);
                b.advance(n);
                Ok(n)
            }
            ResponseBody::Reader(r) => r.read(buf),
            ResponseBody::Reassembly(s) => s.read(buf),
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Buffered(b) => write!(f, "Buffered({} bytes)", b.len()),
            ResponseBody::Reader(_) => write!(f, "Reader"),
            ResponseBody::Reassembly(_) => write!(f, "Reassembly"),
        }
    }
}

/// Copies a request, deep-copying its header map so concurrent sub-requests
/// never share mutable header state. Method, target and version are copied by value.
pub fn clone_request(req: &FetchRequest) -> FetchRequest {
    let mut out = http::Request::new(());
    *out.method_mut() = req.method().clone();
    *out.uri_mut() = req.uri().clone();
    *out.version_mut() = req.version();
    *out.headers_mut() = req.headers().clone();
    out
}

/// Header value as `&str`, if present and valid ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Sets a header from a string, rejecting values that are not valid header text.
pub(crate) fn set_header(
    headers: &mut HeaderMap,
    name: &HeaderName,
    value: &str,
) -> FetchResult<()> {
    let v = value.parse().map_err(|_| FetchError::InvalidHeader {
        name: "header value",
        value: value.to_string(),
    })?;
    headers.insert(name.clone(), v);
    Ok(())
}

/// Resolves a `Location` value against the request target.
///
/// Relative locations need an absolute base; origin-form bases only accept
/// absolute or path locations.
pub fn resolve_location(base: &Uri, location: &str) -> FetchResult<Uri> {
    let invalid = || FetchError::InvalidHeader {
        name: "Location",
        value: location.to_string(),
    };
    if base.scheme().is_some() {
        let base = url::Url::parse(&base.to_string()).map_err(|_| invalid())?;
        let joined = base.join(location).map_err(|_| invalid())?;
        joined.as_str().parse::<Uri>().map_err(|_| invalid())
    } else {
        location.parse::<Uri>().map_err(|_| invalid())
    }
}
