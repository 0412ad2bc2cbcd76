//! Retry and backoff for sub-range fetches.
//!
//! Classification maps a round-trip outcome to an [`ErrorKind`]; the
//! [`RetryPolicy`] turns kind and attempt number into a [`RetryDecision`];
//! [`fetch_with_retry`] runs the loop for one sub-range, including redirect
//! following and the overload backoff against a health-check target.

mod classify;
mod health;
mod policy;
mod run;

pub use classify::{classify_error, classify_http_status};
pub use health::health_check_request;
pub use policy::{ErrorKind, OverloadBackoff, RetryDecision, RetryPolicy};
pub use run::fetch_with_retry;
