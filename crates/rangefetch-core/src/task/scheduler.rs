//! Window scheduler: decides whether another sub-range may be dispatched now.
//!
//! A claim needs a free worker slot and room in the dispatch window: the
//! distance from `expectedRangePos` to the end of the new sub-range must stay
//! within `fetchLimit * fetchWorkerNum * 2`. The window bounds how much
//! out-of-order data can sit in the pending set.

use std::sync::atomic::Ordering;

use http::header::RANGE;

use super::{lock, RangeFetchTask};
use crate::config::OverloadRecovery;
use crate::error::FetchResult;
use crate::header::ByteRange;
use crate::message::{set_header, FetchRequest, X_SNOVA_HCE};

impl RangeFetchTask {
    /// Claims the next sub-range, advancing `rangePos` and taking a worker slot.
    ///
    /// Returns `None` when the task is closed, not yet planned, fully
    /// dispatched, out of worker slots, or blocked by the window. The caller
    /// must pair every returned range with one [`release_worker`](Self::release_worker).
    pub fn claim_next(&self) -> Option<ByteRange> {
        if self.is_closed() {
            return None;
        }
        let content_end = {
            let plan = lock(&self.inner.plan);
            if !plan.status_ok {
                return None;
            }
            plan.content_end?
        };

        let limit = self.worker_limit();
        self.inner
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                (w < limit).then_some(w + 1)
            })
            .ok()?;

        let claimed = {
            let mut pos = lock(&self.inner.cursor);
            let fetch_limit = self.inner.opts.fetch_limit;
            if *pos > content_end {
                None
            } else {
                let len = fetch_limit.min(content_end - *pos + 1);
                let ahead = pos.saturating_sub(self.expected_pos());
                let window = fetch_limit
                    .saturating_mul(limit as u64)
                    .saturating_mul(2);
                if ahead + len > window {
                    None
                } else {
                    let r = ByteRange::new(*pos, *pos + len - 1);
                    *pos += len;
                    Some(r)
                }
            }
        };
        if claimed.is_none() {
            self.release_worker();
        }
        claimed
    }

    /// Returns a worker slot taken by [`claim_next`](Self::claim_next).
    pub fn release_worker(&self) {
        let _ = self
            .inner
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| w.checked_sub(1));
    }

    /// Claims every sub-range currently admissible and hands each to `send`.
    ///
    /// Stops at the first error; the slot of the failed range is released.
    pub(crate) fn dispatch_ready<F>(&self, mut send: F) -> FetchResult<usize>
    where
        F: FnMut(ByteRange) -> FetchResult<()>,
    {
        let mut sent = 0;
        while let Some(range) = self.claim_next() {
            tracing::debug!(
                session = self.session(),
                "dispatch range {}-{} (in flight {})",
                range.start,
                range.end,
                self.in_flight()
            );
            if let Err(e) = send(range) {
                self.release_worker();
                return Err(e);
            }
            sent += 1;
        }
        Ok(sent)
    }

    /// Copy of the original request narrowed to `range` and marked internal.
    pub fn subrange_request(&self, range: ByteRange) -> FetchResult<FetchRequest> {
        let mut req = self.request_copy()?;
        set_header(req.headers_mut(), &RANGE, &range.range_header_value())?;
        set_header(req.headers_mut(), &X_SNOVA_HCE, "1")?;
        self.metrics().record_subrange_request();
        Ok(req)
    }

    /// Cuts concurrency to one worker after an overload signal (408/503).
    pub fn reduce_workers(&self) {
        let before = self.inner.worker_limit.swap(1, Ordering::AcqRel);
        self.inner.success_streak.store(0, Ordering::Release);
        self.metrics().record_overload();
        if before > 1 {
            tracing::warn!(
                session = self.session(),
                "upstream overloaded, workers {} -> 1",
                before
            );
        }
    }

    /// Counts a completed sub-fetch; may raise the worker count again under
    /// [`OverloadRecovery::Restore`].
    pub(crate) fn note_success(&self) {
        let OverloadRecovery::Restore { after_successes } = self.inner.opts.overload_recovery
        else {
            return;
        };
        let configured = self.inner.opts.fetch_worker_num;
        if self.worker_limit() >= configured {
            return;
        }
        let streak = self.inner.success_streak.fetch_add(1, Ordering::AcqRel) + 1;
        if streak < after_successes.max(1) {
            return;
        }
        self.inner.success_streak.store(0, Ordering::Release);
        let raised = self
            .inner
            .worker_limit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |w| {
                (w < configured).then(|| (w * 2).min(configured))
            });
        if let Ok(before) = raised {
            tracing::info!(
                session = self.session(),
                "upstream recovered, workers {} -> {}",
                before,
                (before * 2).min(configured)
            );
        }
    }
}
