//! Failure and cancellation causes reported by the pipeline.
//!
//! Every request ends in exactly one of three outcomes: completed, failed or
//! canceled. Failures carry an [`ErrorCause`]; cancellations carry a
//! [`CancelCause`]. Cancellation is not an error and is reported on its own
//! channel.

use crate::scheduler::LaneKind;
use std::fmt;
use thiserror::Error;

/// Errors reported by a [`Fetcher`](crate::traits::Fetcher).
///
/// The pipeline handles every variant the same way (the request fails with
/// [`ErrorCause::FetchFailed`]); the subdivision exists for logging and for
/// callers inspecting the cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The transfer did not finish within the fetcher's deadline.
    #[error("fetch timed out")]
    Timeout,

    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// Transport or filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// The fetcher observed the cancel probe and stopped early.
    #[error("fetch canceled")]
    Canceled,

    /// Anything else the fetcher wants to surface.
    #[error("{0}")]
    Other(String),
}

/// Error reported by a [`Decoder`](crate::traits::Decoder).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecodeError {
    /// Human-readable error message.
    pub message: String,
}

impl DecodeError {
    /// Creates a new decode error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorCause {
    /// Malformed or empty URI.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// No collaborator can service this URI.
    #[error("unsupported uri: {0}")]
    Unsupported(String),

    /// The raw fetch failed.
    #[error("fetch failed: {0}")]
    FetchFailed(#[from] FetchError),

    /// The decoder rejected the input.
    #[error("decode failed: {0}")]
    DecodeFailed(#[from] DecodeError),

    /// A stage reported success but produced nothing usable.
    #[error("result lost: {0}")]
    ResultLost(String),

    /// The task was evicted from a saturated lane queue before it started.
    #[error("{lane} lane queue overflowed")]
    QueueOverflow { lane: LaneKind },

    /// The pipeline was shut down before the request could finish.
    #[error("pipeline is shut down")]
    PipelineShutdown,
}

/// Why a request was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelCause {
    /// The caller invoked `cancel()` on the request handle.
    Caller,
    /// The consumer detached or was dropped while the request was in flight.
    ConsumerBroken,
    /// The request level forbids network access and the input is not cached.
    LevelIsLocal,
    /// The request level only allows the memory cache and it missed.
    LevelIsMemory,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => write!(f, "canceled by caller"),
            Self::ConsumerBroken => write!(f, "consumer broken"),
            Self::LevelIsLocal => write!(f, "request level is local"),
            Self::LevelIsMemory => write!(f, "request level is memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_converts_into_cause() {
        let cause: ErrorCause = FetchError::Http { status: 404 }.into();
        assert_eq!(cause, ErrorCause::FetchFailed(FetchError::Http { status: 404 }));
        assert_eq!(cause.to_string(), "fetch failed: HTTP 404");
    }

    #[test]
    fn test_queue_overflow_names_lane() {
        let cause = ErrorCause::QueueOverflow {
            lane: LaneKind::Network,
        };
        assert_eq!(cause.to_string(), "network lane queue overflowed");
    }

    #[test]
    fn test_decode_error_message() {
        let cause: ErrorCause = DecodeError::new("truncated header").into();
        assert_eq!(cause.to_string(), "decode failed: truncated header");
    }
}
