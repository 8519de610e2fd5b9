//! Request state machine and terminal outcomes.
//!
//! ```text
//! Created → WaitDispatch → Dispatching ─┬─────────────────────────────┐
//!                                       ├→ WaitDownload → Downloading ┤
//!                                       │                             ▼
//!                                       └──────────────────────→ WaitLoad → Loading
//!                                                                            │
//!                         MemoryCheck → Decoding → Processing ←──────────────┘
//!                                                      │
//!                                                      ▼
//!                             WaitDeliver → Completed | Failed | Canceled
//! ```
//!
//! Any non-terminal state may move straight to `Canceled` or `Failed`.

use crate::error::{CancelCause, ErrorCause};
use crate::traits::Artifact;
use std::fmt;

/// Position of a request in the pipeline.
///
/// Variants are declared in pipeline order; the derived ordering is what
/// makes transitions forward-only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    #[default]
    Created,
    WaitDispatch,
    Dispatching,
    WaitDownload,
    Downloading,
    WaitLoad,
    Loading,
    MemoryCheck,
    Decoding,
    Processing,
    WaitDeliver,
    Completed,
    Failed,
    Canceled,
}

impl State {
    /// Returns true for `Completed`, `Failed` and `Canceled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::WaitDispatch => "wait-dispatch",
            Self::Dispatching => "dispatching",
            Self::WaitDownload => "wait-download",
            Self::Downloading => "downloading",
            Self::WaitLoad => "wait-load",
            Self::Loading => "loading",
            Self::MemoryCheck => "memory-check",
            Self::Decoding => "decoding",
            Self::Processing => "processing",
            Self::WaitDeliver => "wait-deliver",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Which source produced a delivered artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadFrom {
    MemoryCache,
    DiskCache,
    Network,
    Local,
}

impl fmt::Display for LoadFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory-cache"),
            Self::DiskCache => write!(f, "disk-cache"),
            Self::Network => write!(f, "network"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// A successfully produced artifact and where it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivered {
    pub artifact: Artifact,
    pub from: LoadFrom,
}

/// Terminal outcome of a request. Exactly one is ever produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed(Delivered),
    Failed(ErrorCause),
    Canceled(CancelCause),
}

impl Outcome {
    /// The terminal state matching this outcome.
    pub fn state(&self) -> State {
        match self {
            Self::Completed(_) => State::Completed,
            Self::Failed(_) => State::Failed,
            Self::Canceled(_) => State::Canceled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns the delivered artifact, if any.
    pub fn delivered(&self) -> Option<&Delivered> {
        match self {
            Self::Completed(d) => Some(d),
            _ => None,
        }
    }
}

/// Snapshot of a request published through its watch channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Status {
    pub state: State,
    pub outcome: Option<Outcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered_along_the_pipeline() {
        assert!(State::Created < State::WaitDispatch);
        assert!(State::Dispatching < State::WaitDownload);
        assert!(State::Downloading < State::WaitLoad);
        assert!(State::MemoryCheck < State::Decoding);
        assert!(State::WaitDeliver < State::Completed);
    }

    #[test]
    fn test_terminal_states() {
        assert!(State::Completed.is_terminal());
        assert!(State::Failed.is_terminal());
        assert!(State::Canceled.is_terminal());
        assert!(!State::WaitDeliver.is_terminal());
        assert!(!State::Created.is_terminal());
    }

    #[test]
    fn test_outcome_state() {
        assert_eq!(
            Outcome::Failed(ErrorCause::PipelineShutdown).state(),
            State::Failed
        );
        assert_eq!(
            Outcome::Canceled(CancelCause::Caller).state(),
            State::Canceled
        );
    }
}
