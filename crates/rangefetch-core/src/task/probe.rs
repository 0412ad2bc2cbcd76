//! Probe handling: turns the first `206` into the response the caller sees.

use std::sync::atomic::Ordering;

use http::header::{CONTENT_LENGTH, CONTENT_RANGE};
use http::StatusCode;

use super::{lock, FetchState, RangeFetchTask};
use crate::error::{FetchError, FetchResult};
use crate::header::{parse_content_range_header, ByteRange};
use crate::message::{header_str, set_header, FetchResponse, ResponseBody};
use crate::stream;

impl RangeFetchTask {
    /// Handles the probe response and synthesizes the caller's response.
    ///
    /// The probe must be `206`. Its `Content-Range` total (or, failing that,
    /// its `Content-Length`) fixes the resource length, which bounds
    /// `contentEnd`. The synthesized response is `200` without
    /// `Content-Range` when the caller sent no `Range`, otherwise `206` with
    /// `bytes begin-end/total`. `Content-Length` always covers the whole
    /// interval. The body is a fresh reassembly stream whose first bytes are
    /// the probe payload.
    pub fn handle_probe(&self, res: FetchResponse) -> FetchResult<FetchResponse> {
        self.check_live()?;
        let session = self.session();
        let status = res.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::ProtocolViolation {
                expected: StatusCode::PARTIAL_CONTENT,
                got: status,
            });
        }

        let (mut parts, body) = res.into_parts();
        let total = match header_str(&parts.headers, &CONTENT_RANGE) {
            Some(v) => parse_content_range_header(v)?.total,
            None => None,
        }
        .or_else(|| {
            header_str(&parts.headers, &CONTENT_LENGTH).and_then(|v| v.trim().parse::<u64>().ok())
        });
        let total = total.ok_or_else(|| FetchError::InvalidHeader {
            name: "Content-Range",
            value: header_str(&parts.headers, &CONTENT_RANGE)
                .unwrap_or_default()
                .to_string(),
        })?;

        let mut plan = lock(&self.inner.plan);
        let begin = plan.content_begin;
        if total == 0 || begin >= total {
            return Err(FetchError::InvalidHeader {
                name: "Content-Range",
                value: format!("total {} for range starting at {}", total, begin),
            });
        }
        let end = plan.content_end.map_or(total - 1, |e| e.min(total - 1));
        plan.content_end = Some(end);
        let interval = ByteRange::new(begin, end);

        if plan.origin_range.is_some() {
            parts.status = StatusCode::PARTIAL_CONTENT;
            set_header(
                &mut parts.headers,
                &CONTENT_RANGE,
                &interval.content_range_value(total),
            )?;
        } else {
            parts.status = StatusCode::OK;
            parts.headers.remove(CONTENT_RANGE);
        }
        set_header(
            &mut parts.headers,
            &CONTENT_LENGTH,
            &interval.len().to_string(),
        )?;

        let mut payload = match body {
            Some(b) => b.into_bytes()?,
            None => bytes::Bytes::new(),
        };
        if payload.len() as u64 > interval.len() {
            payload.truncate(interval.len() as usize);
        }
        let n = payload.len() as u64;

        let (sink, mut stream) = stream::channel(self.inner.opts.stream_capacity);
        stream.prime(payload);
        {
            let mut delivery = lock(&self.inner.delivery);
            delivery.expected = begin + n;
            if begin + n > end {
                sink.finish();
            } else {
                delivery.sink = Some(sink);
            }
        }
        *lock(&self.inner.cursor) = begin + n;
        self.inner.expected.store(begin + n, Ordering::Release);
        self.metrics().record_delivered(n);

        plan.state = FetchState::WaitRangeGetRes;
        plan.status_ok = parts.status.as_u16() < 300;
        drop(plan);
        self.release_if_closed();

        tracing::info!(
            session,
            "probe ok: total {}, delivering {}-{} ({} bytes from probe)",
            total,
            begin,
            end,
            n
        );
        Ok(FetchResponse::from_parts(
            parts,
            Some(ResponseBody::Reassembly(stream)),
        ))
    }
}
