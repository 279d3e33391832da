//! Rank and promotion state machine.
//!
//! A signer set runs several instances sharing one validator key. Exactly
//! one of them holds rank 1 and is allowed to sign; the others wait on
//! ranks 2..=N. Every instance counts the blocks the current rank-1 signer
//! missed in a row and climbs one rank once that count reaches the
//! configured threshold.
//!
//! The counter starts locked. Standby instances started before the leader
//! produced its first observed signature would otherwise treat the silence
//! as a failure and climb the ladder early, which ends in two instances
//! signing the same height.

use crate::{RankError, StateError};

/// Miss counter and rank of a single signer instance.
///
/// No I/O and no interior locking: callers sharing it across tasks wrap it
/// in a mutex.
#[derive(Debug, Clone)]
pub struct RankController {
    rank: u32,
    missed_in_a_row: u32,
    threshold: u32,
    counter_locked: bool,
    /// Set once rank 1 crossed the threshold. Never cleared.
    must_shutdown: bool,
}

impl RankController {
    /// Create a locked controller on the given starting rank.
    pub fn new(threshold: u32, rank: u32) -> Result<Self, StateError> {
        if threshold < 2 {
            return Err(StateError::InvalidThreshold(threshold));
        }
        if rank < 1 {
            return Err(StateError::InvalidRank(rank));
        }
        Ok(Self {
            rank,
            missed_in_a_row: 0,
            threshold,
            counter_locked: true,
            must_shutdown: false,
        })
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn missed_in_a_row(&self) -> u32 {
        self.missed_in_a_row
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn is_counter_locked(&self) -> bool {
        self.counter_locked
    }

    /// Whether rank 1 ran out of promotions and the instance has to stop.
    pub fn must_shutdown(&self) -> bool {
        self.must_shutdown
    }

    /// Only rank 1 may produce genuine signatures, and only until it has
    /// been told to shut down.
    pub fn is_authoritative(&self) -> bool {
        self.rank == 1 && !self.must_shutdown
    }

    /// Unlock the miss counter. Idempotent; logs on the first call only.
    pub fn unlock_counter(&mut self) {
        if self.counter_locked {
            tracing::info!(
                rank = self.rank,
                "Found first commitsig from validator, start counting missed blocks in a row"
            );
            self.counter_locked = false;
        }
    }

    /// Record one missed signing opportunity of the current leader.
    ///
    /// Errors:
    /// - `CounterLocked` if the counter has not been unlocked yet; nothing changes.
    /// - `ThresholdExceeded` once the threshold is hit and the promotion went through.
    /// - `MustShutdown` once the threshold is hit on rank 1, and on every call after.
    pub fn missed(&mut self) -> Result<(), RankError> {
        if self.must_shutdown {
            return Err(RankError::MustShutdown);
        }
        if self.counter_locked {
            return Err(RankError::CounterLocked);
        }

        let before = self.missed_in_a_row;
        self.missed_in_a_row += 1;
        tracing::info!(
            missed_before = before,
            missed = self.missed_in_a_row,
            threshold = self.threshold,
            "Missed a block ({}/{})",
            self.missed_in_a_row,
            self.threshold
        );

        if self.missed_in_a_row >= self.threshold {
            tracing::info!(
                missed = self.missed_in_a_row,
                threshold = self.threshold,
                "Missed too many blocks in a row"
            );
            self.reset();
            self.promote()?;
            return Err(RankError::ThresholdExceeded);
        }

        Ok(())
    }

    /// Zero the miss counter. Silent no-op if it is already zero.
    pub fn reset(&mut self) {
        if self.missed_in_a_row > 0 {
            tracing::debug!(
                missed_before = self.missed_in_a_row,
                missed = 0,
                "Reset counter for missed blocks in a row"
            );
            self.missed_in_a_row = 0;
        }
    }

    /// Move one rank up the ladder. Only reachable from the threshold
    /// branch of `missed()`.
    fn promote(&mut self) -> Result<(), RankError> {
        if self.rank == 1 {
            self.must_shutdown = true;
            tracing::error!(rank = self.rank, "Cannot promote beyond rank 1");
            return Err(RankError::MustShutdown);
        }

        let before = self.rank;
        self.rank -= 1;
        self.reset();
        tracing::info!(
            rank_before = before,
            rank = self.rank,
            "Promoted validator (rank {} -> {})",
            before,
            self.rank
        );

        Ok(())
    }
}
