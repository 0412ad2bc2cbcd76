//! In-memory upstream and request builders for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE};
use http::{Method, StatusCode};

use crate::config::TaskOptions;
use crate::error::{FetchError, FetchResult};
use crate::header::parse_range_header;
use crate::message::{header_str, FetchRequest, FetchResponse, ResponseBody};
use crate::metrics::EngineMetrics;
use crate::sync_get::Fetch;
use crate::task::RangeFetchTask;

pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub(crate) fn get(uri: &str, range: Option<&str>) -> FetchRequest {
    let mut b = http::Request::builder().method(Method::GET).uri(uri);
    if let Some(r) = range {
        b = b.header(RANGE, r);
    }
    b.body(()).unwrap()
}

pub(crate) fn partial(data: &[u8], start: u64, end: u64) -> FetchResponse {
    let chunk = Bytes::copy_from_slice(&data[start as usize..=end as usize]);
    http::Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(
            CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, data.len()),
        )
        .header(CONTENT_LENGTH, chunk.len())
        .body(Some(ResponseBody::Buffered(chunk)))
        .unwrap()
}

pub(crate) fn status_only(status: StatusCode) -> FetchResponse {
    http::Response::builder()
        .status(status)
        .body(Some(ResponseBody::Buffered(Bytes::new())))
        .unwrap()
}

pub(crate) fn opts(fetch_limit: u64, workers: usize) -> TaskOptions {
    TaskOptions {
        fetch_limit,
        fetch_worker_num: workers,
        stream_capacity: 16,
        overload_initial_backoff: std::time::Duration::from_millis(5),
        overload_max_backoff: std::time::Duration::from_millis(20),
        ..TaskOptions::default()
    }
}

pub(crate) fn task(fetch_limit: u64, workers: usize) -> RangeFetchTask {
    RangeFetchTask::new(1, opts(fetch_limit, workers), EngineMetrics::new())
}

/// Canned reply consumed before normal serving.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Status(StatusCode),
    Redirect(&'static str),
    TransportError,
}

/// Serves `data` with byte-range support, after replaying a script of canned replies.
pub(crate) struct MemoryUpstream {
    data: Bytes,
    script: Mutex<VecDeque<Scripted>>,
    seen: Mutex<Vec<(String, Option<String>)>>,
}

impl MemoryUpstream {
    pub(crate) fn new(data: Vec<u8>) -> Arc<Self> {
        Self::with_script(data, Vec::new())
    }

    pub(crate) fn with_script(data: Vec<u8>, script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            data: Bytes::from(data),
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// `(uri, Range)` of every request received, in order.
    pub(crate) fn seen(&self) -> Vec<(String, Option<String>)> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn serve(&self, req: &FetchRequest) -> FetchResponse {
        let total = self.data.len() as u64;
        let Some(value) = header_str(req.headers(), &RANGE) else {
            return http::Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_LENGTH, total)
                .body(Some(ResponseBody::Buffered(self.data.clone())))
                .unwrap();
        };
        let spec = parse_range_header(value).unwrap();
        if spec.start >= total {
            return status_only(StatusCode::RANGE_NOT_SATISFIABLE);
        }
        let end = spec.end.map_or(total - 1, |e| e.min(total - 1));
        partial(&self.data, spec.start, end)
    }
}

impl Fetch for MemoryUpstream {
    fn fetch(&self, req: FetchRequest) -> FetchResult<FetchResponse> {
        self.seen.lock().unwrap().push((
            req.uri().to_string(),
            header_str(req.headers(), &RANGE).map(str::to_string),
        ));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            None => Ok(self.serve(&req)),
            Some(Scripted::Status(s)) => Ok(status_only(s)),
            Some(Scripted::Redirect(location)) => Ok(http::Response::builder()
                .status(StatusCode::FOUND)
                .header(LOCATION, location)
                .body(None)
                .unwrap()),
            Some(Scripted::TransportError) => Err(FetchError::transport("connection reset")),
        }
    }
}
