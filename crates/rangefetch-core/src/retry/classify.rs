//! Classify sub-range responses and transport errors into retry kinds.

use http::StatusCode;

use crate::error::FetchError;
use crate::retry::policy::ErrorKind;

/// Classifies a sub-range response. `None` means it is usable as is
/// (`206` with a body).
pub fn classify_http_status(status: StatusCode, has_body: bool) -> Option<ErrorKind> {
    match status.as_u16() {
        206 if has_body => None,
        302 => Some(ErrorKind::Redirect),
        408 | 503 => Some(ErrorKind::Overloaded),
        _ => Some(ErrorKind::Transient),
    }
}

/// Classifies an error returned by the transport or by the task.
pub fn classify_error(e: &FetchError) -> ErrorKind {
    if e.is_retryable() {
        ErrorKind::Transient
    } else {
        ErrorKind::Fatal
    }
}
