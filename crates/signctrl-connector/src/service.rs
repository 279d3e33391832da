//! Running instance lifecycle: start, quit, stop.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use signctrl_protocol::SigningDelegate;

use crate::config::ControllerSettings;
use crate::controller::{ControllerLoop, Termination};
use crate::dispatcher::Dispatcher;
use crate::observer::{run_observer, CommitObservation};
use crate::supervisor::ConnectionSupervisor;
use crate::transport::Dialer;
use crate::{ConnectorError, DialError, SharedRank};

/// Capacity of the observation channel.
const OBSERVATION_BUFFER: usize = 64;

pub struct SignCtrl;

impl SignCtrl {
    /// Spawn the controller loop and observer, and wait for the first connection.
    ///
    /// `stop` may be cancelled at any point, including while the first dial
    /// is still being retried; `start` then returns `DialError::Cancelled`.
    /// Any other failure to establish the first connection is returned as is.
    pub async fn start<D, S>(
        settings: ControllerSettings,
        dialer: D,
        signer: S,
        rank: SharedRank,
        stop: CancellationToken,
    ) -> Result<RunningSignCtrl, ConnectorError>
    where
        D: Dialer + 'static,
        S: SigningDelegate + 'static,
    {
        // Child so `RunningSignCtrl::stop` doesn't reach back into the caller's token
        let stop = stop.child_token();
        let done = CancellationToken::new();

        {
            let r = rank.lock().await;
            tracing::info!(
                rank = r.rank(),
                threshold = r.threshold(),
                addr = %settings.validator_addr,
                chain_id = %settings.chain_id,
                "Starting signctrl"
            );
        }

        let supervisor = ConnectionSupervisor::new(
            dialer,
            settings.validator_addr.clone(),
            settings.conn_key_path.clone(),
            settings.dial_policy,
            stop.clone(),
        );

        let (obs_tx, obs_rx) = mpsc::channel(OBSERVATION_BUFFER);
        let (fatal_tx, fatal_rx) = mpsc::channel(1);

        tokio::spawn(run_observer(obs_rx, rank.clone(), fatal_tx, stop.clone()));

        let dispatcher = Dispatcher::new(signer, rank.clone(), settings.chain_id.clone());
        let controller = ControllerLoop::new(
            supervisor,
            dispatcher,
            settings.liveness_timeout,
            stop.clone(),
            fatal_rx,
        );
        let serving = controller.serving_signal();

        let mut task = {
            let stop = stop.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let result = controller.connect_and_run().await;
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Controller loop failed");
                }
                stop.cancel();
                done.cancel();
                result
            })
        };

        tokio::select! {
            biased;
            _ = serving.cancelled() => {}
            joined = &mut task => {
                stop.cancel();
                let result = joined
                    .map_err(|e| ConnectorError::Internal(format!("controller task panicked: {e}")))?;
                return Err(match result {
                    Err(e) => e,
                    Ok(_) => ConnectorError::Dial(DialError::Cancelled),
                });
            }
        }

        Ok(RunningSignCtrl {
            rank,
            stop,
            done,
            task: Some(task),
            observations: obs_tx,
        })
    }
}

/// Handle to a started instance.
pub struct RunningSignCtrl {
    rank: SharedRank,
    stop: CancellationToken,
    done: CancellationToken,
    task: Option<JoinHandle<Result<Termination, ConnectorError>>>,
    observations: mpsc::Sender<CommitObservation>,
}

impl RunningSignCtrl {
    /// Resolves once the controller loop has ended, for whatever reason.
    pub async fn quit(&self) {
        self.done.cancelled().await
    }

    pub fn has_quit(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Ask the instance to stop. Safe to call any number of times.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::info!("Stopping signctrl");
        }
        self.stop.cancel();
    }

    /// Wait for the controller loop's outcome. Returns an error if called twice.
    pub async fn wait(&mut self) -> Result<Termination, ConnectorError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| ConnectorError::Internal("controller loop already awaited".into()))?;
        task.await
            .map_err(|e| ConnectorError::Internal(format!("controller task panicked: {e}")))?
    }

    /// Current rank.
    pub async fn rank(&self) -> u32 {
        self.rank.lock().await.rank()
    }

    pub fn rank_handle(&self) -> SharedRank {
        self.rank.clone()
    }

    /// Sender for the chain observer's per-height results.
    pub fn observation_sender(&self) -> mpsc::Sender<CommitObservation> {
        self.observations.clone()
    }
}
