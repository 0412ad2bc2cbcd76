//! Minimal HTTP/1.1 server with Range GET support for integration tests.
//!
//! Serves a single static body. Can be told to answer a number of sub-range
//! requests with `503`, or to redirect sub-ranges to another path, and
//! counts requests that still carry the internal marker header.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Path sub-ranges are redirected to when `redirect_subranges` is set.
pub const MOVED_PATH: &str = "/moved";

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// Number of sub-range GETs (start > 0) answered with 503 before serving normally.
    pub busy_responses: usize,
    /// If true, sub-range GETs outside `MOVED_PATH` get a 302 to it.
    pub redirect_subranges: bool,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            busy_responses: 0,
            redirect_subranges: false,
        }
    }
}

/// Handle to a running server.
#[derive(Clone)]
pub struct RangeServer {
    /// Base URL, e.g. "http://127.0.0.1:12345/".
    pub url: String,
    requests: Arc<AtomicUsize>,
    marker_seen: Arc<AtomicUsize>,
}

impl RangeServer {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Requests that arrived with an `X-Snova-HCE` header.
    pub fn marker_seen(&self) -> usize {
        self.marker_seen.load(Ordering::SeqCst)
    }
}

/// Starts a server in a background thread serving `body`. Runs until the process exits.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let server = RangeServer {
        url: format!("http://127.0.0.1:{}/", port),
        requests: Arc::new(AtomicUsize::new(0)),
        marker_seen: Arc::new(AtomicUsize::new(0)),
    };
    let busy_left = Arc::new(AtomicUsize::new(opts.busy_responses));
    let handle_server = server.clone();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let busy_left = Arc::clone(&busy_left);
            let server = handle_server.clone();
            thread::spawn(move || handle(stream, &body, opts, &busy_left, &server));
        }
    });
    server
}

struct Request<'a> {
    method: &'a str,
    path: &'a str,
    range: Option<(u64, u64)>,
    has_marker: bool,
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: RangeServerOptions,
    busy_left: &AtomicUsize,
    server: &RangeServer,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let Ok(raw) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let req = parse_request(raw);
    server.requests.fetch_add(1, Ordering::SeqCst);
    if req.has_marker {
        server.marker_seen.fetch_add(1, Ordering::SeqCst);
    }
    if !req.method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    let total = body.len() as u64;
    let is_subrange = matches!(req.range, Some((start, _)) if start > 0);
    if opts.support_ranges && is_subrange {
        if busy_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            let _ = stream.write_all(
                b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }
        if opts.redirect_subranges && req.path != MOVED_PATH {
            let response = format!(
                "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                MOVED_PATH
            );
            let _ = stream.write_all(response.as_bytes());
            return;
        }
    }

    let (status, content_range, slice) = match req.range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl {
                (
                    "416 Range Not Satisfiable",
                    Some(format!("bytes */{}", total)),
                    &body[0..0],
                )
            } else {
                (
                    "206 Partial Content",
                    Some(format!("bytes {}-{}/{}", start, end_incl, total)),
                    &body[start as usize..=end_incl as usize],
                )
            }
        }
        None => ("200 OK", None, body),
    };
    let content_range = content_range
        .map(|v| format!("Content-Range: {}\r\n", v))
        .unwrap_or_default();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
        status,
        slice.len(),
        content_range
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(slice);
}

fn parse_request(raw: &str) -> Request<'_> {
    let mut req = Request {
        method: "",
        path: "/",
        range: None,
        has_marker: false,
    };
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if req.method.is_empty() {
            let mut parts = line.split_whitespace();
            req.method = parts.next().unwrap_or("");
            req.path = parts.next().unwrap_or("/");
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("x-snova-hce") {
            req.has_marker = true;
        }
        if name.eq_ignore_ascii_case("range") {
            let value = value.trim();
            if value.to_lowercase().starts_with("bytes=") {
                if let Some((a, b)) = value[6..].trim().split_once('-') {
                    let start = a.trim().parse::<u64>().unwrap_or(0);
                    let end = b.trim();
                    let end_incl = if end.is_empty() {
                        u64::MAX
                    } else {
                        end.parse::<u64>().unwrap_or(0)
                    };
                    req.range = Some((start, end_incl));
                }
            }
        }
    }
    req
}
