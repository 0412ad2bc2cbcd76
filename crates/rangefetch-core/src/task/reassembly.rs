//! Pending chunk set and in-order delivery.
//!
//! Sub-range responses arrive in any order. A chunk whose start equals
//! `expectedRangePos` is written to the stream at once; anything further
//! ahead waits in the pending set keyed by start offset. After every write
//! the pending set is drained while its lowest key is contiguous. Writing,
//! draining and the sentinel all happen under the delivery lock, so the
//! consumer sees bytes in offset order and the sentinel exactly once.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use http::header::CONTENT_RANGE;
use http::StatusCode;

use super::{lock, RangeFetchTask};
use crate::error::{FetchError, FetchResult};
use crate::header::parse_content_range_header;
use crate::message::{header_str, FetchResponse};
use crate::stream::ChunkSink;

#[derive(Default)]
pub(super) struct Delivery {
    /// `expectedRangePos`: next offset the consumer needs.
    pub(super) expected: u64,
    pub(super) pending: BTreeMap<u64, Bytes>,
    /// Producer side of the stream; `None` before the probe and after release.
    pub(super) sink: Option<ChunkSink>,
}

impl Delivery {
    /// Drops the producer (ending the stream) and any buffered chunks.
    pub(super) fn release(&mut self) {
        self.pending.clear();
        self.sink = None;
    }

    /// Writes `chunk` (which starts at or before `expected`) and advances.
    /// Bytes below `expected` are already delivered and are skipped.
    /// Returns false if the consumer has gone away.
    fn push(&mut self, start: u64, chunk: Bytes) -> bool {
        let skip = self.expected.saturating_sub(start);
        if skip >= chunk.len() as u64 {
            return true;
        }
        let chunk = chunk.slice(skip as usize..);
        let len = chunk.len() as u64;
        let Some(sink) = self.sink.as_ref() else {
            return false;
        };
        if sink.write(chunk) == 0 {
            return false;
        }
        self.expected += len;
        true
    }

    /// Delivers every pending chunk that has become contiguous.
    fn drain(&mut self) -> bool {
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() > self.expected {
                break;
            }
            let (start, chunk) = entry.remove_entry();
            if !self.push(start, chunk) {
                return false;
            }
        }
        true
    }
}

impl RangeFetchTask {
    /// Steady-state handling of one sub-range response.
    ///
    /// The response must be `206` with a body and a parseable
    /// `Content-Range` that starts on a range already dispatched and covers
    /// that whole sub-range (`fetchLimit` bytes, or up to `contentEnd` for the
    /// last one). Its payload is written if contiguous, otherwise held until
    /// the gap before it is filled. When the last byte has been delivered the
    /// end-of-stream sentinel is sent.
    pub fn handle_chunk(&self, res: FetchResponse) -> FetchResult<()> {
        self.check_live()?;
        let session = self.session();
        let status = res.status();
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::ProtocolViolation {
                expected: StatusCode::PARTIAL_CONTENT,
                got: status,
            });
        }
        let value = header_str(res.headers(), &CONTENT_RANGE)
            .ok_or(FetchError::InvalidHeader {
                name: "Content-Range",
                value: String::new(),
            })?
            .to_string();
        let got = parse_content_range_header(&value)?;
        let start = got.start;
        let body = res.into_body().ok_or(FetchError::NilBody(status))?;
        let payload = body.into_bytes()?;
        let (content_begin, content_end) = self.content_range();
        let Some(content_end) = content_end else {
            return Err(FetchError::TaskAlreadyClosed(session));
        };
        if start < content_begin || start > content_end || start >= self.range_pos() {
            return Err(FetchError::InvalidHeader {
                name: "Content-Range",
                value,
            });
        }
        let end = start
            .saturating_add(self.inner.opts.fetch_limit - 1)
            .min(content_end);
        if got.end != end || payload.len() as u64 != end - start + 1 {
            return Err(FetchError::IncompleteRange {
                start,
                end,
                got: format!("{} ({} body bytes)", value, payload.len()),
            });
        }

        let mut delivery = lock(&self.inner.delivery);
        let before = delivery.expected;
        let alive = if start > delivery.expected {
            tracing::debug!(
                session,
                "expect range chunk {}, got {}; holding",
                delivery.expected,
                start
            );
            delivery.pending.insert(start, payload);
            true
        } else {
            delivery.push(start, payload) && delivery.drain()
        };
        let delivered = delivery.expected - before;
        self.inner.expected.store(delivery.expected, Ordering::Release);
        self.metrics().record_delivered(delivered);

        if !alive {
            delivery.release();
            drop(delivery);
            self.close();
            tracing::debug!(session, "consumer closed the stream");
            return Err(FetchError::TaskAlreadyClosed(session));
        }
        if delivery.expected > content_end {
            if let Some(sink) = delivery.sink.take() {
                sink.finish();
                tracing::info!(session, "range fetch complete at {}", delivery.expected);
            }
            delivery.pending.clear();
        }
        drop(delivery);
        self.release_if_closed();
        Ok(())
    }
}
