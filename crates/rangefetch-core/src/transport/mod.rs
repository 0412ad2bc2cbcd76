//! Blocking transports for the synchronous driver.
//!
//! [`CurlTransport`] performs one libcurl round trip per request and buffers
//! the body. [`FailoverTransport`] tries a list of candidate transports in
//! order and reports [`crate::FetchError::NoUpstreamRoute`] when all fail.

mod curl;
mod failover;
mod parse;

pub use self::curl::CurlTransport;
pub use failover::FailoverTransport;
pub use parse::parse_response_head;
