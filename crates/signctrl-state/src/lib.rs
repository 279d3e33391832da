//! SignCTRL State - rank/promotion state machine and rank persistence
//!
//! Holds the pure, I/O-free `RankController` that decides when a standby
//! signer climbs the priority ladder, plus the small on-disk hook used to
//! carry the last-known rank across restarts.

pub mod error;
pub mod last_rank;
pub mod rank;

pub use error::*;
pub use last_rank::{load_last_rank, save_last_rank, LastRank, LAST_RANK_FILE};
pub use rank::RankController;
