//! Retry loop for one sub-range: send, classify, redirect or back off, repeat.

use std::thread;
use std::time::{Duration, Instant};

use http::header::{CONTENT_RANGE, LOCATION};
use http::StatusCode;

use super::classify::{classify_error, classify_http_status};
use super::health::health_check_request;
use super::policy::{ErrorKind, RetryDecision, RetryPolicy};
use crate::error::{FetchError, FetchResult};
use crate::header::{parse_content_range_header, ByteRange};
use crate::message::{
    clone_request, header_str, resolve_location, FetchRequest, FetchResponse, ResponseBody,
};
use crate::sync_get::Fetch;
use crate::task::RangeFetchTask;

/// Longest single sleep between closure checks during the overload wait.
const CLOSE_POLL: Duration = Duration::from_millis(50);

/// Fetches `range` for `task`, retrying per the task's policy.
///
/// Returns the first `206` response whose body covers exactly `range`; a
/// shorter answer counts as a failed attempt. A `302` re-targets the
/// request at its `Location`. A `408`/`503` cuts the task to one worker and
/// waits (doubling sleeps) until the health check stops reporting overload;
/// if the check then succeeds the attempt is not counted, otherwise it is and
/// the budget applies. The loop ends early once the task is closed.
pub fn fetch_with_retry(
    task: &RangeFetchTask,
    transport: &dyn Fetch,
    range: ByteRange,
) -> FetchResult<FetchResponse> {
    let policy = RetryPolicy::from_options(task.options());
    let session = task.session();
    let mut req = task.subrange_request(range)?;
    let mut attempt = 1u32;
    loop {
        if task.is_closed() {
            return Err(FetchError::TaskAlreadyClosed(session));
        }
        let (kind, err, location) = match transport.fetch(clone_request(&req)) {
            Ok(res) => {
                let status = res.status();
                match classify_http_status(status, res.body().is_some()) {
                    None => match check_coverage(&res, range) {
                        Ok(()) => return Ok(res),
                        Err(e) => (classify_error(&e), e, None),
                    },
                    Some(kind) => {
                        let location = header_str(res.headers(), &LOCATION).map(str::to_string);
                        (kind, response_error(status, res.body().is_some()), location)
                    }
                }
            }
            Err(e) => (classify_error(&e), e, None),
        };

        match policy.decide(attempt, kind) {
            RetryDecision::NoRetry => {
                tracing::warn!(
                    session,
                    "range {}-{} failed after {} attempt(s): {}",
                    range.start,
                    range.end,
                    attempt,
                    err
                );
                return Err(err);
            }
            RetryDecision::Retry => {
                tracing::debug!(
                    session,
                    "range {}-{} attempt {}: {}",
                    range.start,
                    range.end,
                    attempt,
                    err
                );
            }
            RetryDecision::FollowRedirect => match location.filter(|l| !l.is_empty()) {
                Some(location) => {
                    let target = resolve_location(req.uri(), &location)?;
                    tracing::info!(
                        session,
                        "range {}-{} redirect to {}",
                        range.start,
                        range.end,
                        target
                    );
                    *req.uri_mut() = target;
                    task.metrics().record_redirect();
                }
                None => {
                    tracing::debug!(session, "redirect without location, retrying as is");
                }
            },
            RetryDecision::WaitForRecovery => {
                task.reduce_workers();
                if wait_for_recovery(task, transport, &req, &policy)? {
                    continue;
                }
                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        session,
                        "range {}-{} still overloaded after {} attempt(s): {}",
                        range.start,
                        range.end,
                        attempt,
                        err
                    );
                    return Err(err);
                }
            }
        }
        attempt += 1;
        task.metrics().record_retry();
    }
}

/// Fails unless `res` answers exactly `range`: same `Content-Range` bounds
/// and, when the body is already in memory, a body of that length.
fn check_coverage(res: &FetchResponse, range: ByteRange) -> FetchResult<()> {
    let value = header_str(res.headers(), &CONTENT_RANGE).unwrap_or_default();
    let got = parse_content_range_header(value)?;
    let body_len = match res.body() {
        Some(ResponseBody::Buffered(b)) => Some(b.len() as u64),
        _ => None,
    };
    if got.start != range.start
        || got.end != range.end
        || body_len.is_some_and(|n| n != range.len())
    {
        return Err(FetchError::IncompleteRange {
            start: range.start,
            end: range.end,
            got: format!(
                "bytes {}-{} ({} body bytes)",
                got.start,
                got.end,
                body_len.map_or_else(|| "unknown".to_string(), |n| n.to_string())
            ),
        });
    }
    Ok(())
}

fn response_error(status: StatusCode, has_body: bool) -> FetchError {
    if status == StatusCode::PARTIAL_CONTENT && !has_body {
        FetchError::NilBody(status)
    } else {
        FetchError::ProtocolViolation {
            expected: StatusCode::PARTIAL_CONTENT,
            got: status,
        }
    }
}

/// Sleeps through the overload backoff, probing the health-check target
/// after each sleep. Returns `Ok(true)` when the target answered below 400
/// (the failed attempt is then not counted), `Ok(false)` when it failed some
/// other way. Fails with `TaskAlreadyClosed` if the task closes meanwhile.
fn wait_for_recovery(
    task: &RangeFetchTask,
    transport: &dyn Fetch,
    req: &FetchRequest,
    policy: &RetryPolicy,
) -> FetchResult<bool> {
    let session = task.session();
    let check = health_check_request(&task.options().health_check, req)?;
    for delay in policy.overload_backoff() {
        tracing::info!(session, "upstream overloaded, waiting {:?}", delay);
        sleep_unless_closed(task, delay);
        if task.is_closed() {
            return Err(FetchError::TaskAlreadyClosed(session));
        }
        let Some(check) = check.as_ref() else {
            return Ok(true);
        };
        match transport.fetch(clone_request(check)) {
            Ok(res) if classify_http_status(res.status(), true) == Some(ErrorKind::Overloaded) => {
                continue;
            }
            Ok(res) => return Ok(res.status().as_u16() < 400),
            Err(e) => {
                tracing::debug!(session, "health check failed: {}", e);
                return Ok(false);
            }
        }
    }
    Ok(false)
}

fn sleep_unless_closed(task: &RangeFetchTask, total: Duration) {
    let deadline = Instant::now() + total;
    loop {
        let now = Instant::now();
        if now >= deadline || task.is_closed() {
            return;
        }
        thread::sleep((deadline - now).min(CLOSE_POLL));
    }
}
