//! Ranged-fetch reassembly engine for an HTTP(S) tunneling proxy.
//!
//! A [`RangeFetchTask`] turns one client `GET` into a probe plus a stream of
//! bounded `Range` sub-requests, fetched in parallel and reassembled in
//! offset order into a single response body.

pub mod async_get;
pub mod config;
pub mod error;
pub mod header;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod stream;
pub mod sync_get;
pub mod task;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use async_get::Dispatch;
pub use config::{RangeFetchConfig, TaskOptions};
pub use error::{FetchError, FetchResult};
pub use message::{FetchRequest, FetchResponse, ResponseBody};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use queue::{Completion, CompletionPoster, CompletionQueue, Outcome, TaskRegistry};
pub use stream::ReassemblyStream;
pub use sync_get::Fetch;
pub use task::{Entry, FetchState, RangeFetchTask};
pub use transport::{CurlTransport, FailoverTransport};
