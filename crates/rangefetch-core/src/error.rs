//! Engine error type.
//!
//! Every failure a Fetch Task can report is one `FetchError` variant, so the
//! retry policy can classify it before anything is surfaced to the session
//! layer.

use http::{Method, StatusCode};

/// Result alias used throughout the engine.
pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Only `GET` requests can be range-split.
    #[error("only GET requests are supported, got {0}")]
    UnsupportedMethod(Method),

    /// The upstream answered with a status that is not valid for the current phase.
    #[error("expected {expected} response, got {got}")]
    ProtocolViolation { expected: StatusCode, got: StatusCode },

    /// An operation was attempted on a task that has already been closed.
    #[error("session {0} already closed")]
    TaskAlreadyClosed(u32),

    /// A partial-content response arrived without a body.
    #[error("nil body for {0} response")]
    NilBody(StatusCode),

    /// Every candidate upstream failed for this request.
    #[error("no upstream route for {target} with {candidates} candidate(s)")]
    NoUpstreamRoute { target: String, candidates: usize },

    /// The task's validation callback rejected it.
    #[error("session {0} terminated by validation callback")]
    Terminated(u32),

    /// The transport failed to complete the round trip.
    #[error("transport: {0}")]
    Transport(String),

    /// A `206` answer covered less (or other) than the sub-range it answers.
    #[error("sub-range {start}-{end} answered with {got}")]
    IncompleteRange { start: u64, end: u64, got: String },

    /// A `Range` / `Content-Range` (or similar) header could not be parsed.
    #[error("invalid {name} header: {value:?}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// True if a sub-range fetch that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Transport(_)
                | FetchError::Io(_)
                | FetchError::NoUpstreamRoute { .. }
                | FetchError::NilBody(_)
                | FetchError::ProtocolViolation { .. }
                | FetchError::IncompleteRange { .. }
        )
    }

    pub(crate) fn transport(e: impl std::fmt::Display) -> Self {
        FetchError::Transport(e.to_string())
    }
}
