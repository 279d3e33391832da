//! Bridge from an external chain observer to the rank controller.
//!
//! Whatever decides if the leader's signature made it into a block (an RPC
//! poller, a websocket subscription, a test) only has to send a
//! [`CommitObservation`] per height.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use signctrl_state::RankError;

use crate::SharedRank;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitObservation {
    /// The expected leader's signature is in the commit for `height`.
    LeaderSigned { height: i64 },
    /// The commit for `height` lacks the expected leader's signature.
    LeaderMissed { height: i64 },
}

impl CommitObservation {
    pub fn height(&self) -> i64 {
        match self {
            CommitObservation::LeaderSigned { height } | CommitObservation::LeaderMissed { height } => {
                *height
            }
        }
    }
}

/// Apply one observation to the shared rank.
///
/// Only `MustShutdown` comes back as an error; a voided miss and a completed
/// promotion are logged here and reported as success.
pub async fn apply_observation(
    rank: &SharedRank,
    observation: CommitObservation,
) -> Result<(), RankError> {
    let mut rank = rank.lock().await;
    match observation {
        CommitObservation::LeaderSigned { .. } => {
            rank.unlock_counter();
            rank.reset();
            Ok(())
        }
        CommitObservation::LeaderMissed { height } => match rank.missed() {
            Ok(()) => Ok(()),
            Err(RankError::CounterLocked) => {
                tracing::debug!(height, "{}", RankError::CounterLocked);
                Ok(())
            }
            Err(RankError::ThresholdExceeded) => {
                tracing::info!(height, rank = rank.rank(), "{}", RankError::ThresholdExceeded);
                Ok(())
            }
            Err(e @ RankError::MustShutdown) => {
                tracing::error!(height, rank = rank.rank(), "{}", e);
                Err(e)
            }
        },
    }
}

/// Consume observations until stopped, forwarding fatal outcomes to the loop.
pub(crate) async fn run_observer(
    mut observations: mpsc::Receiver<CommitObservation>,
    rank: SharedRank,
    fatal_tx: mpsc::Sender<RankError>,
    stop: CancellationToken,
) {
    loop {
        let observation = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            next = observations.recv() => match next {
                Some(o) => o,
                None => break,
            },
        };

        if let Err(e) = apply_observation(&rank, observation).await {
            if fatal_tx.send(e).await.is_err() {
                tracing::debug!("Controller loop already gone, dropping rank outcome");
            }
            break;
        }
    }
    tracing::debug!("Observer task finished");
}
