//! Persistence of the last-known rank across restarts.
//!
//! The file is written on every quit and read once on start-up, where it
//! takes precedence over the configured starting rank.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::StateError;

/// File name of the persisted rank inside the config directory.
pub const LAST_RANK_FILE: &str = "last_rank.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRank {
    pub last_rank: u32,
}

pub fn last_rank_path(dir: &Path) -> PathBuf {
    dir.join(LAST_RANK_FILE)
}

/// Read the persisted rank. A missing file is not an error.
pub fn load_last_rank(dir: &Path) -> Result<Option<u32>, StateError> {
    let path = last_rank_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)?;
    let record: LastRank = serde_json::from_slice(&bytes)?;
    if record.last_rank < 1 {
        return Err(StateError::InvalidRank(record.last_rank));
    }
    Ok(Some(record.last_rank))
}

/// Write the rank, replacing any previous record.
pub fn save_last_rank(dir: &Path, rank: u32) -> Result<(), StateError> {
    if rank < 1 {
        return Err(StateError::InvalidRank(rank));
    }
    std::fs::create_dir_all(dir)?;
    let path = last_rank_path(dir);
    let json = serde_json::to_vec_pretty(&LastRank { last_rank: rank })?;

    // Write-then-rename so a crash never leaves a truncated record.
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, &path)?;

    tracing::info!(rank, path = %path.display(), "Saved last rank");
    Ok(())
}
