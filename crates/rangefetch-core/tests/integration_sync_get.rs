//! Integration test: local HTTP server with Range support, reassembled via
//! the synchronous driver over libcurl.

mod common;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use common::range_server::{self, RangeServerOptions};
use http::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use http::{Method, StatusCode};
use rangefetch_core::config::HealthCheckConfig;
use rangefetch_core::message::header_str;
use rangefetch_core::{
    CurlTransport, EngineMetrics, Fetch, FetchRequest, FetchResponse, RangeFetchTask, TaskOptions,
};
use sha2::{Digest, Sha256};

fn body_of(len: usize) -> Vec<u8> {
    (0u8..100).cycle().take(len).collect()
}

fn get(url: &str, range: Option<&str>) -> FetchRequest {
    let mut b = http::Request::builder().method(Method::GET).uri(url);
    if let Some(r) = range {
        b = b.header(RANGE, r);
    }
    b.body(()).unwrap()
}

fn options(fetch_limit: u64, workers: usize) -> TaskOptions {
    TaskOptions {
        fetch_limit,
        fetch_worker_num: workers,
        overload_initial_backoff: Duration::from_millis(10),
        overload_max_backoff: Duration::from_millis(40),
        ..TaskOptions::default()
    }
}

fn read_body(res: FetchResponse) -> Vec<u8> {
    let mut out = Vec::new();
    res.into_body()
        .expect("body")
        .read_to_end(&mut out)
        .expect("read body");
    out
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[test]
fn parallel_subranges_reassemble_to_the_served_body() {
    let body = body_of(256 * 1024);
    let server = range_server::start(body.clone());
    let metrics = EngineMetrics::new();
    let task = RangeFetchTask::new(1, options(16 * 1024, 4), Arc::clone(&metrics));

    let res = task
        .sync_get(get(&server.url, None), None, Arc::new(CurlTransport::new()))
        .expect("sync_get");
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        header_str(res.headers(), &CONTENT_LENGTH),
        Some("262144")
    );
    assert!(res.headers().get(CONTENT_RANGE).is_none());

    let content = read_body(res);
    assert_eq!(content.len(), body.len(), "size must match");
    assert_eq!(sha256_hex(&content), sha256_hex(&body), "content must match");
    assert_eq!(metrics.snapshot().bytes_delivered, body.len() as u64);
    assert_eq!(server.marker_seen(), 0, "marker header must not reach the wire");
}

#[test]
fn caller_range_gets_a_partial_response() {
    let body = body_of(100 * 1024);
    let server = range_server::start(body.clone());
    let task = RangeFetchTask::new(2, options(8 * 1024, 3), EngineMetrics::new());

    let res = task
        .sync_get(
            get(&server.url, Some("bytes=1000-")),
            None,
            Arc::new(CurlTransport::new()),
        )
        .expect("sync_get");
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(res.headers(), &CONTENT_RANGE),
        Some("bytes 1000-102399/102400")
    );
    assert_eq!(read_body(res), &body[1000..]);
}

#[test]
fn server_without_ranges_is_passed_through() {
    let body = body_of(40 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            support_ranges: false,
            ..RangeServerOptions::default()
        },
    );
    let task = RangeFetchTask::new(3, options(8 * 1024, 2), EngineMetrics::new());
    let res = task
        .sync_get(get(&server.url, None), None, Arc::new(CurlTransport::new()))
        .expect("sync_get");
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_body(res), body);
    assert_eq!(server.requests(), 1);
}

#[test]
fn overloaded_server_drops_to_one_worker_and_finishes() {
    let body = body_of(64 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            busy_responses: 3,
            ..RangeServerOptions::default()
        },
    );
    let metrics = EngineMetrics::new();
    let mut opts = options(8 * 1024, 4);
    opts.health_check = HealthCheckConfig::Upstream;
    let task = RangeFetchTask::new(4, opts, Arc::clone(&metrics));
    let res = task
        .sync_get(get(&server.url, None), None, Arc::new(CurlTransport::new()))
        .expect("sync_get");
    assert_eq!(read_body(res), body);
    assert_eq!(task.worker_limit(), 1);
    assert!(metrics.snapshot().overload_events >= 1);
}

#[test]
fn redirected_subranges_follow_location() {
    let body = body_of(48 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            redirect_subranges: true,
            ..RangeServerOptions::default()
        },
    );
    let metrics = EngineMetrics::new();
    let task = RangeFetchTask::new(5, options(8 * 1024, 2), Arc::clone(&metrics));
    let res = task
        .sync_get(get(&server.url, None), None, Arc::new(CurlTransport::new()))
        .expect("sync_get");
    assert_eq!(read_body(res), body);
    assert!(metrics.snapshot().redirects >= 1);
}

#[test]
fn curl_transport_returns_raw_partial_response() {
    let body = body_of(1024);
    let server = range_server::start(body.clone());
    let res = CurlTransport::new()
        .fetch(get(&server.url, Some("bytes=10-19")))
        .expect("fetch");
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(res.headers(), &CONTENT_RANGE),
        Some("bytes 10-19/1024")
    );
    assert_eq!(read_body(res), &body[10..20]);
}
