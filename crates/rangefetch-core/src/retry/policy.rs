use std::time::Duration;

use crate::config::TaskOptions;

/// High-level classification of a failed sub-range round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `302`: retry against the `Location` target.
    Redirect,
    /// `408` or `503`: upstream asks us to back off.
    Overloaded,
    /// Transport failure or an unexpected status; retried as is.
    Transient,
    /// Retrying cannot help (task closed, malformed request).
    Fatal,
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up and report the last error.
    NoRetry,
    /// Send the same request again.
    Retry,
    /// Re-target the request at the redirect location and send it again.
    FollowRedirect,
    /// Drop to one worker, wait for the upstream to recover, then retry.
    WaitForRecovery,
}

/// Attempt budget plus overload backoff bounds.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// First sleep while the upstream is overloaded.
    pub initial_backoff: Duration,
    /// Upper bound on a single overload sleep.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(64),
        }
    }
}

impl RetryPolicy {
    pub fn from_options(opts: &TaskOptions) -> Self {
        Self {
            max_attempts: opts.max_attempts.max(1),
            initial_backoff: opts.overload_initial_backoff,
            max_backoff: opts.overload_max_backoff,
        }
    }

    /// Decides what to do after `attempt` (1-based) failed with `kind`.
    ///
    /// Overload always waits for recovery; whether the attempt counts is
    /// settled by the health check afterwards. A counted attempt is held to
    /// the same budget by the caller.
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        match kind {
            ErrorKind::Fatal => RetryDecision::NoRetry,
            ErrorKind::Overloaded => RetryDecision::WaitForRecovery,
            _ if attempt >= self.max_attempts => RetryDecision::NoRetry,
            ErrorKind::Redirect => RetryDecision::FollowRedirect,
            ErrorKind::Transient => RetryDecision::Retry,
        }
    }

    /// Sleep schedule for the overload wait: initial, doubled each round, capped.
    pub fn overload_backoff(&self) -> OverloadBackoff {
        OverloadBackoff {
            next: self.initial_backoff,
            max: self.max_backoff.max(self.initial_backoff),
        }
    }
}

/// Endless doubling delay sequence.
#[derive(Debug, Clone)]
pub struct OverloadBackoff {
    next: Duration,
    max: Duration,
}

impl Iterator for OverloadBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let d = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        Some(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_never_retries() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, ErrorKind::Fatal), RetryDecision::NoRetry);
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryPolicy::default();
        for attempt in 1..4 {
            assert_eq!(p.decide(attempt, ErrorKind::Transient), RetryDecision::Retry);
            assert_eq!(
                p.decide(attempt, ErrorKind::Redirect),
                RetryDecision::FollowRedirect
            );
        }
        assert_eq!(p.decide(4, ErrorKind::Transient), RetryDecision::NoRetry);
        assert_eq!(p.decide(4, ErrorKind::Redirect), RetryDecision::NoRetry);
    }

    #[test]
    fn overload_waits_even_on_last_attempt() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.decide(4, ErrorKind::Overloaded),
            RetryDecision::WaitForRecovery
        );
    }

    #[test]
    fn overload_backoff_doubles_and_is_capped() {
        let p = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        };
        let delays: Vec<u64> = p.overload_backoff().take(6).map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
    }

    #[test]
    fn policy_follows_task_options() {
        let opts = TaskOptions {
            max_attempts: 0,
            ..TaskOptions::default()
        };
        let p = RetryPolicy::from_options(&opts);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.initial_backoff, Duration::from_secs(1));
    }
}
