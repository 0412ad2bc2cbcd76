//! Asynchronous driver: requests go out through a fire-and-forget
//! [`Dispatch`] and their responses come back, one at a time, through
//! [`RangeFetchTask::process_async_response`].
//!
//! There is no retry on this path. A failed sub-range surfaces as an error
//! from `process_async_response` and closes the task.

use http::header::{LOCATION, RANGE};
use http::StatusCode;

use crate::error::{FetchError, FetchResult};
use crate::message::{
    header_str, resolve_location, set_header, FetchRequest, FetchResponse, X_RANGE, X_SNOVA_HCE,
};
use crate::task::{FetchState, RangeFetchTask};

/// Sends a request without waiting for its response.
pub trait Dispatch: Send + Sync {
    fn send(&self, req: FetchRequest) -> FetchResult<()>;
}

impl<F> Dispatch for F
where
    F: Fn(FetchRequest) -> FetchResult<()> + Send + Sync,
{
    fn send(&self, req: FetchRequest) -> FetchResult<()> {
        self(req)
    }
}

impl RangeFetchTask {
    /// Starts the task: sends either the caller's request unchanged or the probe.
    pub fn async_get(&self, req: FetchRequest, dispatch: &dyn Dispatch) -> FetchResult<()> {
        let req = self.begin(req)?.into_request();
        dispatch.send(req)
    }

    /// Handles one response delivered for this task.
    ///
    /// Returns the response the caller should see, if this one produced it:
    /// the pass-through response, a non-`206` probe answer, or the
    /// synthesized response after a good probe. Sub-range responses return
    /// `None`; their bytes go to the stream. After handling, every
    /// sub-range the window admits is dispatched.
    ///
    /// A `302` carrying both `Location` and `X-Range` during the steady state
    /// is an upstream delegation: the logical range is re-sent to the new
    /// location and the worker slot stays taken.
    pub fn process_async_response(
        &self,
        res: FetchResponse,
        dispatch: &dyn Dispatch,
    ) -> FetchResult<Option<FetchResponse>> {
        let session = self.session();
        let state = self.state();
        if state == FetchState::WaitRangeGetRes && res.status() == StatusCode::FOUND {
            if let Some(req) = self.delegated_request(&res)? {
                tracing::info!(session, "range delegated to {}", req.uri());
                self.metrics().record_redirect();
                dispatch.send(req)?;
                return Ok(None);
            }
        }

        let out = match state {
            FetchState::WaitNormalRes => {
                self.check_live()?;
                return Ok(Some(res));
            }
            FetchState::WaitHeadRes => {
                if res.status() != StatusCode::PARTIAL_CONTENT {
                    tracing::info!(
                        session,
                        "probe answered {}, passing response through",
                        res.status()
                    );
                    return Ok(Some(res));
                }
                Some(self.handle_probe(res)?)
            }
            FetchState::WaitRangeGetRes => {
                self.release_worker();
                match self.handle_chunk(res) {
                    Ok(()) => self.note_success(),
                    Err(e) => {
                        self.abort(&e);
                        return Err(e);
                    }
                }
                None
            }
        };

        if let Err(e) = self.dispatch_ready(|range| dispatch.send(self.subrange_request(range)?)) {
            self.abort(&e);
            return Err(e);
        }
        Ok(out)
    }

    /// Request re-targeted by a `302` + `X-Range` answer, if `res` is one.
    fn delegated_request(&self, res: &FetchResponse) -> FetchResult<Option<FetchRequest>> {
        let location = header_str(res.headers(), &LOCATION).filter(|v| !v.is_empty());
        let xrange = header_str(res.headers(), &X_RANGE).filter(|v| !v.is_empty());
        let (Some(location), Some(xrange)) = (location, xrange) else {
            return Ok(None);
        };
        let mut req = self.request_copy()?;
        let target = resolve_location(req.uri(), location)?;
        *req.uri_mut() = target;
        set_header(req.headers_mut(), &X_SNOVA_HCE, "1")?;
        set_header(req.headers_mut(), &RANGE, xrange)?;
        Ok(Some(req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    use crate::metrics::EngineMetrics;
    use crate::test_support::{get, opts, partial, pattern, status_only, MemoryUpstream};

    /// Records dispatched requests instead of sending them.
    #[derive(Default)]
    struct Outbox(Mutex<Vec<FetchRequest>>);

    impl Outbox {
        fn take(&self) -> Vec<FetchRequest> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl Dispatch for Outbox {
        fn send(&self, req: FetchRequest) -> FetchResult<()> {
            self.0.lock().unwrap().push(req);
            Ok(())
        }
    }

    fn ranges(reqs: &[FetchRequest]) -> Vec<String> {
        reqs.iter()
            .map(|r| header_str(r.headers(), &RANGE).unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn probe_then_window_of_subranges() {
        let data = pattern(1000);
        let out = Outbox::default();
        let t = RangeFetchTask::new(1, opts(100, 4), EngineMetrics::new());
        t.async_get(get("http://origin/file", None), &out).unwrap();
        assert_eq!(ranges(&out.take()), vec!["bytes=0-24"]);

        let res = t
            .process_async_response(partial(&data, 0, 24), &out)
            .unwrap()
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let sent = out.take();
        assert_eq!(
            ranges(&sent),
            vec!["bytes=25-124", "bytes=125-224", "bytes=225-324", "bytes=325-424"]
        );
        assert!(sent
            .iter()
            .all(|r| header_str(r.headers(), &X_SNOVA_HCE) == Some("1")));
    }

    #[test]
    fn drives_a_whole_fetch_through_an_upstream() {
        let data = pattern(3000);
        let up = MemoryUpstream::new(data.clone());
        let out = Outbox::default();
        let t = RangeFetchTask::new(2, opts(256, 3), EngineMetrics::new());
        t.async_get(get("http://origin/file", None), &out).unwrap();

        let mut caller_res = None;
        let mut queue: Vec<FetchRequest> = out.take();
        while let Some(req) = queue.pop() {
            let res = up.serve(&req);
            if let Some(r) = t.process_async_response(res, &out).unwrap() {
                caller_res = Some(r);
            }
            queue.extend(out.take());
        }
        let mut body = Vec::new();
        caller_res
            .unwrap()
            .into_body()
            .unwrap()
            .read_to_end(&mut body)
            .unwrap();
        assert_eq!(body, data);
        assert_eq!(t.in_flight(), 0);
    }

    #[test]
    fn delegation_redirect_resends_logical_range() {
        let data = pattern(1000);
        let out = Outbox::default();
        let t = RangeFetchTask::new(3, opts(100, 1), EngineMetrics::new());
        t.async_get(get("http://origin/file", None), &out).unwrap();
        out.take();
        t.process_async_response(partial(&data, 0, 24), &out).unwrap();
        assert_eq!(ranges(&out.take()), vec!["bytes=25-124"]);
        assert_eq!(t.in_flight(), 1);

        let redirect = http::Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, "http://mirror/file")
            .header(&X_RANGE, "bytes=25-124")
            .body(None)
            .unwrap();
        assert!(t.process_async_response(redirect, &out).unwrap().is_none());
        let sent = out.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].uri(), "http://mirror/file");
        assert_eq!(ranges(&sent), vec!["bytes=25-124"]);
        assert_eq!(t.in_flight(), 1);
    }

    #[test]
    fn plain_redirect_in_steady_state_is_an_error() {
        let data = pattern(1000);
        let out = Outbox::default();
        let t = RangeFetchTask::new(4, opts(100, 1), EngineMetrics::new());
        t.async_get(get("http://origin/file", None), &out).unwrap();
        t.process_async_response(partial(&data, 0, 24), &out).unwrap();
        let redirect = http::Response::builder()
            .status(StatusCode::FOUND)
            .header(LOCATION, "http://mirror/file")
            .body(None)
            .unwrap();
        let err = t.process_async_response(redirect, &out).unwrap_err();
        assert!(matches!(
            err,
            FetchError::ProtocolViolation { got, .. } if got == StatusCode::FOUND
        ));
        assert!(t.is_closed());
    }

    #[test]
    fn short_subrange_answer_fails_and_closes_the_task() {
        let data = pattern(1000);
        let out = Outbox::default();
        let t = RangeFetchTask::new(8, opts(100, 1), EngineMetrics::new());
        t.async_get(get("http://origin/file", None), &out).unwrap();
        t.process_async_response(partial(&data, 0, 24), &out).unwrap();
        assert_eq!(ranges(&out.take()), vec!["bytes=25-124"]);

        let err = t
            .process_async_response(partial(&data, 25, 74), &out)
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::IncompleteRange { start: 25, end: 124, .. }
        ));
        assert!(t.is_closed());
        assert_eq!(t.in_flight(), 0);
        assert!(out.take().is_empty());
    }

    #[test]
    fn pass_through_response_is_returned_verbatim() {
        let out = Outbox::default();
        let t = RangeFetchTask::new(5, opts(1000, 2), EngineMetrics::new());
        t.async_get(get("http://origin/file", Some("bytes=0-9")), &out)
            .unwrap();
        let sent = out.take();
        assert_eq!(ranges(&sent), vec!["bytes=0-9"]);
        assert!(sent[0].headers().get(&X_SNOVA_HCE).is_none());

        let res = t
            .process_async_response(status_only(StatusCode::NOT_MODIFIED), &out)
            .unwrap()
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
        assert!(out.take().is_empty());
    }

    #[test]
    fn non_partial_probe_answer_is_returned() {
        let out = Outbox::default();
        let t = RangeFetchTask::new(6, opts(1000, 2), EngineMetrics::new());
        t.async_get(get("http://origin/file", None), &out).unwrap();
        out.take();
        let res = t
            .process_async_response(status_only(StatusCode::OK), &out)
            .unwrap()
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(out.take().is_empty());
    }

    #[test]
    fn dispatch_failure_closes_the_task() {
        let data = pattern(1000);
        let t = RangeFetchTask::new(7, opts(100, 2), EngineMetrics::new());
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let flaky = move |_req: FetchRequest| -> FetchResult<()> {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n > 1 {
                Err(FetchError::transport("connection closed"))
            } else {
                Ok(())
            }
        };
        t.async_get(get("http://origin/file", None), &flaky).unwrap();
        let err = t
            .process_async_response(partial(&data, 0, 24), &flaky)
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
        assert!(t.is_closed());
        assert_eq!(t.in_flight(), 0);
    }
}
