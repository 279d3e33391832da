//! SignCTRL Connector - failover controller for remote-signer instances
//!
//! Wires the rank state machine, the connection supervisor and the
//! protocol dispatcher into one controller loop per signer instance, and
//! provides the `signctrl` binary around it.

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod observer;
pub mod service;
pub mod supervisor;
pub mod transport;

pub use config::{config_dir, Config, ControllerSettings};
pub use controller::{ControllerLoop, LoopState, Termination};
pub use dispatcher::{Action, Dispatcher, LoopEvent};
pub use error::{ConnectorError, DialError};
pub use observer::{apply_observation, CommitObservation};
pub use service::{RunningSignCtrl, SignCtrl};
pub use supervisor::{ConnectionSupervisor, DialPolicy};
pub use transport::{Dialer, FramedConnection, SignerConnection, SocketDialer, ValidatorAddr};

use std::sync::Arc;

use signctrl_state::RankController;
use tokio::sync::Mutex;

/// Rank state shared by the dispatch loop and the block observer.
pub type SharedRank = Arc<Mutex<RankController>>;

pub fn shared_rank(controller: RankController) -> SharedRank {
    Arc::new(Mutex::new(controller))
}
