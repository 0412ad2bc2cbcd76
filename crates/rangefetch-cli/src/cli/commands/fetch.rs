//! `rangefetch fetch` – fetch one URL through the range engine.

use anyhow::{bail, Context, Result};
use http::header::{CONTENT_LENGTH, RANGE};
use http::{Method, StatusCode};
use rangefetch_core::config::RangeFetchConfig;
use rangefetch_core::message::header_str;
use rangefetch_core::{
    CompletionQueue, CurlTransport, Dispatch, EngineMetrics, Fetch, FetchRequest, FetchResponse,
    FetchResult, Outcome, RangeFetchTask,
};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::cli::Driver;

/// Session id used for the single task this command runs.
const SESSION: u32 = 1;

#[derive(Debug)]
pub struct FetchArgs {
    pub url: String,
    pub output: Option<PathBuf>,
    pub range: Option<String>,
    pub fetch_limit: Option<u64>,
    pub workers: Option<usize>,
    pub driver: Driver,
    pub sha256: bool,
    pub stats: bool,
}

/// Writer that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Option<Sha256>,
    written: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(h) = self.hasher.as_mut() {
            h.update(&buf[..n]);
        }
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn run_fetch(cfg: &RangeFetchConfig, args: FetchArgs) -> Result<()> {
    let mut opts = cfg.task_options();
    if let Some(limit) = args.fetch_limit {
        opts.fetch_limit = limit;
    }
    if let Some(workers) = args.workers {
        opts.fetch_worker_num = workers;
    }
    let req = build_request(&args.url, args.range.as_deref())?;
    let metrics = EngineMetrics::new();
    let task = RangeFetchTask::new(SESSION, opts, Arc::clone(&metrics));
    tracing::info!(url = %args.url, driver = ?args.driver, "fetch started");

    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut out = HashingWriter {
        inner: out,
        hasher: args.sha256.then(Sha256::new),
        written: 0,
    };

    match args.driver {
        Driver::Sync => {
            let res = task.sync_get(req, None, Arc::new(CurlTransport::new()))?;
            copy_body(res, &mut out)?;
        }
        Driver::Async => fetch_async(&task, req, &mut out)?,
    }
    out.flush()?;

    if let Some(hasher) = out.hasher.take() {
        eprintln!("sha256 {}", hex::encode(hasher.finalize()));
    }
    if args.stats {
        eprintln!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    }
    tracing::info!(bytes = out.written, "fetch finished");
    Ok(())
}

fn build_request(url: &str, range: Option<&str>) -> Result<FetchRequest> {
    let mut builder = http::Request::builder().method(Method::GET).uri(url);
    if let Some(r) = range {
        builder = builder.header(RANGE, r);
    }
    builder.body(()).context("invalid request")
}

/// Reports the status line on stderr and copies the body, checking its length.
fn copy_body(res: FetchResponse, out: &mut impl Write) -> Result<u64> {
    let status = res.status();
    eprintln!("{}", status);
    let expected = header_str(res.headers(), &CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok());
    let n = match res.into_body() {
        Some(mut body) => io::copy(&mut body, out)?,
        None => 0,
    };
    if let Some(expected) = expected {
        if n != expected {
            bail!("body ended after {} of {} bytes", n, expected);
        }
    }
    if status.is_client_error() || status.is_server_error() {
        bail!("upstream answered {}", status);
    }
    Ok(n)
}

/// Runs the task through the completion queue. Each dispatched request is
/// sent on its own thread and its response posted back to the queue.
fn fetch_async(task: &RangeFetchTask, req: FetchRequest, out: &mut impl Write) -> Result<()> {
    let (queue, poster, mut outcomes) = CompletionQueue::new();
    let transport = Arc::new(CurlTransport::new());
    let dispatch: Arc<dyn Dispatch> = Arc::new(move |req: FetchRequest| -> FetchResult<()> {
        let transport = Arc::clone(&transport);
        let poster = poster.clone();
        thread::Builder::new()
            .name(format!("dispatch-{}", SESSION))
            .spawn(move || {
                let res = transport.fetch(req).unwrap_or_else(|e| {
                    tracing::warn!(session = SESSION, "transport failed: {}", e);
                    let mut res = FetchResponse::new(None);
                    *res.status_mut() = StatusCode::BAD_GATEWAY;
                    res
                });
                if poster.post(SESSION, res).is_err() {
                    tracing::debug!(session = SESSION, "completion queue gone");
                }
            })?;
        Ok(())
    });
    let registry = queue.registry();
    queue.start(task.clone(), req, dispatch)?;
    let consumer = thread::Builder::new()
        .name("completions".to_string())
        .spawn(move || queue.run_blocking())?;

    let copied = match outcomes.blocking_recv() {
        Some(Outcome::Response { response, .. }) => copy_body(response, out),
        Some(Outcome::Failed { error, .. }) => Err(error.into()),
        None => Err(anyhow::anyhow!("completion queue closed without a response")),
    };
    if copied.is_err() {
        task.close();
        registry.unregister(SESSION);
    }
    if consumer.join().is_err() {
        tracing::warn!("completion consumer panicked");
    }
    while let Ok(outcome) = outcomes.try_recv() {
        if let Outcome::Failed { error, .. } = outcome {
            return Err(error.into());
        }
    }
    copied.map(|_| ())
}
