//! Dial, retry and replace the single connection to the validator.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use signctrl_protocol::crypto::load_keypair;

use crate::transport::{Dialer, SignerConnection, ValidatorAddr};
use crate::DialError;

/// Delay between dial attempts: doubles after every refusal, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialPolicy {
    pub retry_interval: Duration,
    pub max_retry_interval: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_retry_interval: Duration::from_secs(8),
        }
    }
}

impl DialPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.retry_interval
            .saturating_mul(factor)
            .min(self.max_retry_interval)
    }
}

pub struct ConnectionSupervisor<D: Dialer> {
    dialer: D,
    addr: ValidatorAddr,
    conn_key_path: PathBuf,
    policy: DialPolicy,
    cancel: CancellationToken,
}

impl<D: Dialer> ConnectionSupervisor<D> {
    pub fn new(
        dialer: D,
        addr: ValidatorAddr,
        conn_key_path: PathBuf,
        policy: DialPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dialer,
            addr,
            conn_key_path,
            policy,
            cancel,
        }
    }

    pub fn addr(&self) -> &ValidatorAddr {
        &self.addr
    }

    /// Dial until connected, cancelled, or a failure that retrying can't fix.
    ///
    /// The connection key is re-read for every call; a key that can't be
    /// loaded is fatal.
    pub async fn dial(&self) -> Result<D::Conn, DialError> {
        let key = load_keypair(&self.conn_key_path)
            .map_err(|e| DialError::KeyUnavailable(format!("{}: {e}", self.conn_key_path.display())))?;

        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DialError::Cancelled),
                r = self.dialer.dial(&self.addr, &key) => r,
            };

            match result {
                Ok(conn) => {
                    if attempt > 0 {
                        tracing::info!(addr = %self.addr, attempts = attempt + 1, "Dial succeeded after retries");
                    }
                    return Ok(conn);
                }
                Err(e) if e.is_retryable() => {
                    let delay = self.policy.delay(attempt);
                    tracing::warn!(
                        addr = %self.addr,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Couldn't dial validator, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(DialError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => {
                    tracing::error!(addr = %self.addr, error = %e, "Dial failed");
                    return Err(e);
                }
            }
        }
    }

    /// Close `old` and dial a fresh connection.
    pub async fn replace(&self, old: &mut D::Conn) -> Result<D::Conn, DialError> {
        old.close().await;
        tracing::info!(addr = %self.addr, "Closed stale connection, redialing");
        self.dial().await
    }
}
