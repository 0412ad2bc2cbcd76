//! libcurl round trip: one request in, one buffered response out.

use std::str;
use std::time::Duration;

use bytes::Bytes;
use ::curl::easy::{Easy, List};
use http::Method;

use super::parse::parse_response_head;
use crate::error::{FetchError, FetchResult};
use crate::message::{FetchRequest, FetchResponse, ResponseBody, X_SNOVA_HCE};
use crate::sync_get::Fetch;

/// Blocking transport on top of libcurl.
///
/// Redirects are not followed (the retry loop handles `302` itself), and the
/// internal sub-request marker header is stripped before sending.
#[derive(Debug, Clone)]
pub struct CurlTransport {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below `low_speed_limit` bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Hard wall-clock limit per round trip.
    pub timeout: Duration,
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            timeout: Duration::from_secs(600),
        }
    }
}

impl CurlTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn prepare(&self, req: &FetchRequest) -> Result<Easy, ::curl::Error> {
        let mut easy = Easy::new();
        easy.url(&req.uri().to_string())?;
        easy.follow_location(false)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.low_speed_limit(self.low_speed_limit)?;
        easy.low_speed_time(self.low_speed_time)?;
        easy.timeout(self.timeout)?;
        if req.method() == Method::HEAD {
            easy.nobody(true)?;
        } else if req.method() != Method::GET {
            easy.custom_request(req.method().as_str())?;
        }

        let mut list = List::new();
        for (name, value) in req.headers() {
            if *name == X_SNOVA_HCE {
                continue;
            }
            if let Ok(v) = value.to_str() {
                list.append(&format!("{}: {}", name.as_str(), v.trim()))?;
            }
        }
        easy.http_headers(list)?;
        Ok(easy)
    }
}

impl Fetch for CurlTransport {
    fn fetch(&self, req: FetchRequest) -> FetchResult<FetchResponse> {
        let mut easy = self.prepare(&req).map_err(FetchError::transport)?;
        let mut head: Vec<String> = Vec::new();
        let mut body: Vec<u8> = Vec::new();
        {
            let mut transfer = easy.transfer();
            transfer
                .header_function(|data| {
                    if let Ok(s) = str::from_utf8(data) {
                        head.push(s.trim_end().to_string());
                    }
                    true
                })
                .map_err(FetchError::transport)?;
            transfer
                .write_function(|data| {
                    body.extend_from_slice(data);
                    Ok(data.len())
                })
                .map_err(FetchError::transport)?;
            transfer.perform().map_err(|e| {
                tracing::debug!("{} {} failed: {}", req.method(), req.uri(), e);
                FetchError::transport(e)
            })?;
        }

        let (status, headers) = parse_response_head(&head)?;
        tracing::trace!("{} {} -> {}", req.method(), req.uri(), status);
        let mut res = FetchResponse::new(Some(ResponseBody::Buffered(Bytes::from(body))));
        *res.status_mut() = status;
        *res.headers_mut() = headers;
        Ok(res)
    }
}
