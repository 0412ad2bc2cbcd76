//! Fetch Task: one per client request that needs range-split delivery.
//!
//! The task owns the original request, the target byte interval and the
//! producer side of the reassembly stream. It moves through three states:
//!
//! - `WaitNormalRes`: the request was forwarded unchanged (small or
//!   unparseable caller range); one response is passed through verbatim.
//! - `WaitHeadRes`: a small probe sub-range is in flight to learn the total
//!   length and confirm range support.
//! - `WaitRangeGetRes`: steady state; sub-ranges are claimed from the cursor
//!   and their responses reassembled in offset order.
//!
//! There is no terminal state: closure is the `closed` flag plus the stream
//! sentinel.
//!
//! Two locks guard the shared state: the cursor (`rangePos`) and the
//! delivery side (pending chunks, `expectedRangePos`, stream producer). The
//! in-flight worker count is an atomic and is never touched under the cursor
//! lock.

mod probe;
mod reassembly;
mod scheduler;


use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use http::header::RANGE;
use http::Method;

use crate::config::TaskOptions;
use crate::error::{FetchError, FetchResult};
use crate::header::{parse_range_header, ByteRange, RangeSpec};
use crate::message::{clone_request, header_str, set_header, FetchRequest, X_SNOVA_HCE};
use crate::metrics::{ActiveTaskGuard, EngineMetrics};

use reassembly::Delivery;

/// Where a task is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    WaitNormalRes,
    WaitHeadRes,
    WaitRangeGetRes,
}

/// First request a driver must send for a task.
#[derive(Debug)]
pub enum Entry {
    /// Forward the caller's request unchanged and pass its response through.
    PassThrough(FetchRequest),
    /// Send this probe sub-range request.
    Probe(FetchRequest),
}

impl Entry {
    pub fn into_request(self) -> FetchRequest {
        match self {
            Entry::PassThrough(r) | Entry::Probe(r) => r,
        }
    }
}

/// Data fixed while planning: set by `begin` and the probe, read by the scheduler.
#[derive(Debug)]
struct Plan {
    state: FetchState,
    request: Option<FetchRequest>,
    content_begin: u64,
    /// Last byte to deliver (inclusive); `None` until the probe reports the length.
    content_end: Option<u64>,
    /// Caller's own `Range`, if any.
    origin_range: Option<RangeSpec>,
    /// Synthesized response has a success status; dispatch only runs while true.
    status_ok: bool,
}

type Validation = Box<dyn Fn() -> bool + Send + Sync>;

pub(crate) struct TaskInner {
    session: u32,
    opts: TaskOptions,
    metrics: Arc<EngineMetrics>,
    _active: ActiveTaskGuard,
    validation: OnceLock<Validation>,
    plan: Mutex<Plan>,
    /// `rangePos`: next offset not yet assigned to a sub-range.
    cursor: Mutex<u64>,
    delivery: Mutex<Delivery>,
    /// Mirror of `expectedRangePos` for window checks outside the delivery lock.
    expected: AtomicU64,
    /// `fetchWorkerNum`: may shrink on overload.
    worker_limit: AtomicUsize,
    /// `rangeWorker`: sub-fetches currently in flight.
    in_flight: AtomicUsize,
    /// Consecutive successful sub-fetches since the last overload.
    success_streak: AtomicU32,
    closed: AtomicBool,
}

/// Shared handle to a Fetch Task. Cloning is cheap; all clones drive the same task.
#[derive(Clone)]
pub struct RangeFetchTask {
    inner: Arc<TaskInner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RangeFetchTask {
    pub fn new(session: u32, opts: TaskOptions, metrics: Arc<EngineMetrics>) -> Self {
        let opts = opts.normalized();
        let active = metrics.task_started();
        Self {
            inner: Arc::new(TaskInner {
                session,
                worker_limit: AtomicUsize::new(opts.fetch_worker_num),
                opts,
                _active: active,
                metrics,
                validation: OnceLock::new(),
                plan: Mutex::new(Plan {
                    state: FetchState::WaitNormalRes,
                    request: None,
                    content_begin: 0,
                    content_end: None,
                    origin_range: None,
                    status_ok: false,
                }),
                cursor: Mutex::new(0),
                delivery: Mutex::new(Delivery::default()),
                expected: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                success_streak: AtomicU32::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Installs a predicate checked before every response is handled; once it
    /// returns false the task closes. Only the first call has an effect.
    pub fn set_validation<F>(&self, f: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let _ = self.inner.validation.set(Box::new(f));
    }

    pub fn session(&self) -> u32 {
        self.inner.session
    }

    pub fn options(&self) -> &TaskOptions {
        &self.inner.opts
    }

    pub(crate) fn metrics(&self) -> &EngineMetrics {
        &self.inner.metrics
    }

    pub fn state(&self) -> FetchState {
        lock(&self.inner.plan).state
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// `[contentBegin, contentEnd]`; the end is unknown until the probe completes.
    pub fn content_range(&self) -> (u64, Option<u64>) {
        let plan = lock(&self.inner.plan);
        (plan.content_begin, plan.content_end)
    }

    /// `rangePos`.
    pub fn range_pos(&self) -> u64 {
        *lock(&self.inner.cursor)
    }

    /// `expectedRangePos`.
    pub fn expected_pos(&self) -> u64 {
        self.inner.expected.load(Ordering::Acquire)
    }

    /// Current `fetchWorkerNum`.
    pub fn worker_limit(&self) -> usize {
        self.inner.worker_limit.load(Ordering::Acquire)
    }

    /// Sub-fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// True once every byte of the interval has been handed to the stream.
    pub fn is_complete(&self) -> bool {
        let plan = lock(&self.inner.plan);
        match (plan.state, plan.content_end) {
            (FetchState::WaitRangeGetRes, Some(end)) => self.expected_pos() > end,
            _ => false,
        }
    }

    /// Validates the caller's request and decides between pass-through and probing.
    pub fn begin(&self, req: FetchRequest) -> FetchResult<Entry> {
        let session = self.inner.session;
        if self.is_closed() {
            return Err(FetchError::TaskAlreadyClosed(session));
        }
        if req.method() != Method::GET {
            return Err(FetchError::UnsupportedMethod(req.method().clone()));
        }

        let origin_range = match header_str(req.headers(), &RANGE) {
            None => None,
            Some(value) => match parse_range_header(value) {
                Ok(spec) => {
                    tracing::info!(session, "start with range: {}", value);
                    Some(spec)
                }
                Err(e) => {
                    tracing::warn!(session, "forwarding request unchanged: {}", e);
                    self.set_state(FetchState::WaitNormalRes);
                    return Ok(Entry::PassThrough(req));
                }
            },
        };
        let begin = origin_range.map(|r| r.start).unwrap_or(0);
        let end = origin_range.and_then(|r| r.end);
        let limit = self.inner.opts.fetch_limit;

        *lock(&self.inner.cursor) = begin;
        lock(&self.inner.delivery).expected = begin;
        self.inner.expected.store(begin, Ordering::Release);

        let mut plan = lock(&self.inner.plan);
        plan.content_begin = begin;
        plan.content_end = end;
        plan.origin_range = origin_range;

        if let Some(end) = end {
            if end - begin < limit {
                plan.state = FetchState::WaitNormalRes;
                tracing::debug!(session, "range within fetch limit, passing through");
                return Ok(Entry::PassThrough(req));
            }
        }

        let probe_len = (limit / 4).max(1);
        let mut probe_end = begin + probe_len - 1;
        if let Some(end) = end {
            probe_end = probe_end.min(end);
        }
        let mut probe = clone_request(&req);
        set_header(
            probe.headers_mut(),
            &RANGE,
            &ByteRange::new(begin, probe_end).range_header_value(),
        )?;
        set_header(probe.headers_mut(), &X_SNOVA_HCE, "1")?;
        plan.request = Some(req);
        plan.state = FetchState::WaitHeadRes;
        self.inner.metrics.record_subrange_request();
        Ok(Entry::Probe(probe))
    }

    /// Deep copy of the caller's request, once `begin` has stored it.
    pub(crate) fn request_copy(&self) -> FetchResult<FetchRequest> {
        lock(&self.inner.plan)
            .request
            .as_ref()
            .map(clone_request)
            .ok_or(FetchError::TaskAlreadyClosed(self.inner.session))
    }

    fn set_state(&self, state: FetchState) {
        lock(&self.inner.plan).state = state;
    }

    /// Fails with `TaskAlreadyClosed` after closure, or `Terminated` (and
    /// closes) when the validation callback rejects the task.
    pub(crate) fn check_live(&self) -> FetchResult<()> {
        let session = self.inner.session;
        if self.is_closed() {
            return Err(FetchError::TaskAlreadyClosed(session));
        }
        if let Some(valid) = self.inner.validation.get() {
            if !valid() {
                self.close();
                return Err(FetchError::Terminated(session));
            }
        }
        Ok(())
    }

    /// Closes the task: no further dispatch, in-flight retry loops exit, and
    /// the consumer sees end-of-stream once buffered chunks are read. Idempotent.
    ///
    /// If another thread is blocked writing into the stream, that thread
    /// releases the producer once its write returns.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(session = self.inner.session, "closing task");
        if let Ok(mut delivery) = self.inner.delivery.try_lock() {
            delivery.release();
        }
    }

    /// Drops the producer if `close` raced with a holder of the delivery lock.
    fn release_if_closed(&self) {
        if self.is_closed() {
            lock(&self.inner.delivery).release();
        }
    }

    /// Logs `err`, counts the task as failed and closes it.
    pub(crate) fn abort(&self, err: &FetchError) {
        if self.is_closed() {
            return;
        }
        tracing::warn!(session = self.inner.session, "range fetch failed: {}", err);
        self.inner.metrics.record_failed_task();
        self.close();
    }
}

impl std::fmt::Debug for RangeFetchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeFetchTask")
            .field("session", &self.inner.session)
            .field("state", &self.state())
            .field("range_pos", &self.range_pos())
            .field("expected_pos", &self.expected_pos())
            .field("closed", &self.is_closed())
            .finish()
    }
}
