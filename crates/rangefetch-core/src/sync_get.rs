//! Synchronous driver: the caller blocks for the probe, sub-fetches run on
//! worker threads owned by the task.
//!
//! Each worker fetches one sub-range (with retries), hands the response to
//! the task, frees its slot and then dispatches whatever the window allows,
//! so the pool refills itself until the interval is covered or the task
//! closes.

use std::sync::Arc;
use std::thread;

use http::StatusCode;

use crate::error::{FetchError, FetchResult};
use crate::header::ByteRange;
use crate::message::{FetchRequest, FetchResponse};
use crate::retry::fetch_with_retry;
use crate::task::{Entry, RangeFetchTask};

/// Blocking HTTP round trip used by the synchronous driver and the retry loop.
pub trait Fetch: Send + Sync {
    fn fetch(&self, req: FetchRequest) -> FetchResult<FetchResponse>;
}

impl<F> Fetch for F
where
    F: Fn(FetchRequest) -> FetchResult<FetchResponse> + Send + Sync,
{
    fn fetch(&self, req: FetchRequest) -> FetchResult<FetchResponse> {
        self(req)
    }
}

impl RangeFetchTask {
    /// Serves `req` and returns the response for the caller.
    ///
    /// Requests that need no splitting are forwarded once and their response
    /// returned unchanged. Otherwise the probe is sent (or `first_chunk` is
    /// used as its response, when the caller already holds it); a non-`206`
    /// probe answer is returned unchanged as well. On a `206` the synthesized
    /// response is returned at once and the remaining bytes stream into its
    /// body from background workers.
    pub fn sync_get(
        &self,
        req: FetchRequest,
        first_chunk: Option<FetchResponse>,
        transport: Arc<dyn Fetch>,
    ) -> FetchResult<FetchResponse> {
        let session = self.session();
        let probe = match self.begin(req)? {
            Entry::PassThrough(req) => return transport.fetch(req),
            Entry::Probe(probe) => probe,
        };
        let res = match first_chunk {
            Some(res) => res,
            None => transport.fetch(probe)?,
        };
        if res.status() != StatusCode::PARTIAL_CONTENT {
            tracing::info!(
                session,
                "probe answered {}, passing response through",
                res.status()
            );
            return Ok(res);
        }
        let res = self.handle_probe(res)?;
        spawn_ready(self, &transport);
        Ok(res)
    }
}

/// Starts one worker thread per sub-range the window currently admits.
fn spawn_ready(task: &RangeFetchTask, transport: &Arc<dyn Fetch>) {
    let result = task.dispatch_ready(|range| {
        let worker_task = task.clone();
        let worker_transport = Arc::clone(transport);
        thread::Builder::new()
            .name(format!("range-{}", task.session()))
            .spawn(move || run_worker(worker_task, worker_transport, range))
            .map(|_| ())
            .map_err(FetchError::from)
    });
    if let Err(e) = result {
        task.abort(&e);
    }
}

fn run_worker(task: RangeFetchTask, transport: Arc<dyn Fetch>, range: ByteRange) {
    let outcome =
        fetch_with_retry(&task, transport.as_ref(), range).and_then(|res| task.handle_chunk(res));
    task.release_worker();
    match outcome {
        Ok(()) => {
            task.note_success();
            spawn_ready(&task, &transport);
        }
        Err(FetchError::TaskAlreadyClosed(_)) => {
            tracing::debug!(
                session = task.session(),
                "range {}-{} dropped, task closed",
                range.start,
                range.end
            );
        }
        Err(e) => task.abort(&e),
    }
}
