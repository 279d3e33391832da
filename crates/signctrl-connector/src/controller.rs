//! The controller loop: one connection, one read/dispatch/write at a time.

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use signctrl_protocol::SigningDelegate;
use signctrl_state::RankError;

use crate::dispatcher::{Action, Dispatcher, LoopEvent};
use crate::supervisor::ConnectionSupervisor;
use crate::transport::{Dialer, SignerConnection};
use crate::{ConnectorError, DialError};

/// Liveness deadline used when the configured window overflows `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Why the loop ended without an internal fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Stopped from outside (interrupt or `stop()`).
    Stopped,
    /// Rank 1 missed too many blocks; nothing left to promote to.
    MustShutdown,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Stopped => write!(f, "stopped"),
            Termination::MustShutdown => write!(f, "must shut down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Connecting,
    Serving,
    Reconnecting,
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Connecting => "connecting",
            LoopState::Serving => "serving",
            LoopState::Reconnecting => "reconnecting",
            LoopState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

pub struct ControllerLoop<D: Dialer, S: SigningDelegate> {
    supervisor: ConnectionSupervisor<D>,
    dispatcher: Dispatcher<S>,
    liveness: Duration,
    stop: CancellationToken,
    fatal_rx: mpsc::Receiver<RankError>,
    state: LoopState,
    /// Cancelled the first time the loop enters `Serving`.
    serving: CancellationToken,
}

impl<D: Dialer, S: SigningDelegate> ControllerLoop<D, S> {
    pub fn new(
        supervisor: ConnectionSupervisor<D>,
        dispatcher: Dispatcher<S>,
        liveness: Duration,
        stop: CancellationToken,
        fatal_rx: mpsc::Receiver<RankError>,
    ) -> Self {
        Self {
            supervisor,
            dispatcher,
            liveness,
            stop,
            fatal_rx,
            state: LoopState::Connecting,
            serving: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Fires once the first connection is established.
    pub fn serving_signal(&self) -> CancellationToken {
        self.serving.clone()
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, "Controller state changed");
            self.state = next;
        }
        if next == LoopState::Serving {
            self.serving.cancel();
        }
    }

    /// Dial the first connection, then serve it until terminated.
    ///
    /// A stop while still dialing ends the loop with `Termination::Stopped`.
    pub async fn connect_and_run(mut self) -> Result<Termination, ConnectorError> {
        self.transition(LoopState::Connecting);
        match self.supervisor.dial().await {
            Ok(conn) => self.run(conn).await,
            Err(DialError::Cancelled) => {
                self.transition(LoopState::Terminated);
                Ok(Termination::Stopped)
            }
            Err(e) => {
                self.transition(LoopState::Terminated);
                Err(e.into())
            }
        }
    }

    /// Serve an already dialed connection until terminated.
    ///
    /// The connection is closed on every exit path.
    async fn run(mut self, mut conn: D::Conn) -> Result<Termination, ConnectorError> {
        self.transition(LoopState::Serving);

        let timer = tokio::time::sleep_until(self.deadline());
        tokio::pin!(timer);
        let mut stream_open = true;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.stop.cancelled() => LoopEvent::Stop,
                _ = fatal_signal(&mut self.fatal_rx) => LoopEvent::RankShutdown,
                _ = &mut timer => LoopEvent::LivenessTimeout,
                inbound = conn.recv(), if stream_open => LoopEvent::Inbound(inbound),
            };

            match self.dispatcher.step(event).await {
                Action::Respond(response) => {
                    timer.as_mut().reset(self.deadline());
                    if let Err(e) = conn.send(response).await {
                        tracing::warn!(error = %e, "Couldn't write response to validator");
                    }
                }
                Action::Idle => {
                    timer.as_mut().reset(self.deadline());
                }
                Action::StreamClosed => {
                    stream_open = false;
                }
                Action::Reconnect => {
                    self.transition(LoopState::Reconnecting);
                    tracing::warn!(
                        timeout_ms = self.liveness.as_millis() as u64,
                        "No message from validator within liveness window"
                    );

                    let redial = tokio::select! {
                        biased;
                        _ = fatal_signal(&mut self.fatal_rx) => None,
                        r = self.supervisor.replace(&mut conn) => Some(r),
                    };

                    match redial {
                        Some(Ok(fresh)) => {
                            conn = fresh;
                            stream_open = true;
                            timer.as_mut().reset(self.deadline());
                            self.transition(LoopState::Serving);
                        }
                        Some(Err(DialError::Cancelled)) => {
                            return self.terminate(&mut conn, Termination::Stopped).await;
                        }
                        Some(Err(e)) => {
                            // `replace` closed the stale connection before dialing
                            self.transition(LoopState::Terminated);
                            tracing::error!(error = %e, "Couldn't redial validator");
                            return Err(e.into());
                        }
                        None => {
                            return self.terminate(&mut conn, Termination::MustShutdown).await;
                        }
                    }
                }
                Action::Terminate(reason) => {
                    return self.terminate(&mut conn, reason).await;
                }
            }
        }
    }

    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.liveness).unwrap_or(now + FAR_FUTURE)
    }

    async fn terminate(
        &mut self,
        conn: &mut D::Conn,
        reason: Termination,
    ) -> Result<Termination, ConnectorError> {
        conn.close().await;
        self.transition(LoopState::Terminated);
        tracing::info!(reason = %reason, "Controller loop terminated");
        Ok(reason)
    }
}

/// Resolves on the first fatal rank outcome; pends forever once the sender is gone.
async fn fatal_signal(rx: &mut mpsc::Receiver<RankError>) {
    loop {
        match rx.recv().await {
            Some(e) if e.is_fatal() => return,
            Some(_) => continue,
            None => std::future::pending::<()>().await,
        }
    }
}
