use thiserror::Error;

/// Outcomes of a miss observation that are not plain success.
///
/// Only `MustShutdown` is terminal. `ThresholdExceeded` reports a completed
/// promotion and `CounterLocked` voids the observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RankError {
    #[error("waiting for first commitsig from validator to unlock counter for missed blocks in a row")]
    CounterLocked,

    #[error("threshold exceeded due to too many blocks missed in a row")]
    ThresholdExceeded,

    #[error("node cannot be promoted anymore, so it must be shut down")]
    MustShutdown,
}

impl RankError {
    /// Whether the owning process has to stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RankError::MustShutdown)
    }
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("threshold must be 2 or higher, got {0}")]
    InvalidThreshold(u32),

    #[error("rank must be 1 or higher, got {0}")]
    InvalidRank(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed rank file: {0}")]
    Json(#[from] serde_json::Error),
}
