use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a chain is in its life
///
/// `Completed`, `TimedOut`, `Failed` and `Cancelled` describe the job that just ended; the
/// chain stays there only until the tracker resolves what comes next.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PendingSubmit,
    Active,
    Completed,
    TimedOut,
    Failed,
    Cancelled,
    ChainDone,
    ChainAborted,
}

impl Phase {
    /// Nothing will ever happen to the chain again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::ChainDone | Phase::ChainAborted)
    }

    /// A job ended and the continue/stop decision is still open
    pub fn awaits_resolution(&self) -> bool {
        matches!(self, Phase::Completed | Phase::TimedOut | Phase::Failed | Phase::Cancelled)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Phase::PendingSubmit => write!(f, "PENDING_SUBMIT"),
            Phase::Active => write!(f, "ACTIVE"),
            Phase::Completed => write!(f, "COMPLETED"),
            Phase::TimedOut => write!(f, "TIMED_OUT"),
            Phase::Failed => write!(f, "FAILED"),
            Phase::Cancelled => write!(f, "CANCELLED"),
            Phase::ChainDone => write!(f, "CHAIN_DONE"),
            Phase::ChainAborted => write!(f, "CHAIN_ABORTED"),
        }
    }
}

/// Coarse chain state for humans
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Summary {
    Running,
    Completed,
    /// Aborted after the last job failed
    Failed,
    Aborted,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Summary::Running => write!(f, "running"),
            Summary::Completed => write!(f, "completed"),
            Summary::Failed => write!(f, "failed"),
            Summary::Aborted => write!(f, "aborted"),
        }
    }
}
