//! Health-check request used while waiting out an overloaded upstream.

use http::header::RANGE;
use http::Method;

use crate::config::HealthCheckConfig;
use crate::error::{FetchError, FetchResult};
use crate::header::parse_range_header;
use crate::message::{clone_request, header_str, set_header, FetchRequest, X_SNOVA_HCE};

/// Builds the request probed during the overload wait, or `None` when
/// health checks are disabled.
///
/// `Upstream` asks the same target for the first byte of the sub-range in
/// question; `Url` fetches a fixed address.
pub fn health_check_request(
    cfg: &HealthCheckConfig,
    subrange: &FetchRequest,
) -> FetchResult<Option<FetchRequest>> {
    match cfg {
        HealthCheckConfig::Disabled => Ok(None),
        HealthCheckConfig::Upstream => {
            let mut req = clone_request(subrange);
            let start = header_str(req.headers(), &RANGE)
                .and_then(|v| parse_range_header(v).ok())
                .map_or(0, |r| r.start);
            set_header(
                req.headers_mut(),
                &RANGE,
                &format!("bytes={}-{}", start, start),
            )?;
            set_header(req.headers_mut(), &X_SNOVA_HCE, "1")?;
            Ok(Some(req))
        }
        HealthCheckConfig::Url { url } => {
            let req = http::Request::builder()
                .method(Method::GET)
                .uri(url.as_str())
                .body(())
                .map_err(|_| FetchError::InvalidHeader {
                    name: "health check url",
                    value: url.clone(),
                })?;
            Ok(Some(req))
        }
    }
}
