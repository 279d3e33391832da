//! Transport to the validator's remote-signer endpoint.
//!
//! The validator listens, the signer dials. A dialed stream is wrapped with
//! the [`SignerCodec`] so the rest of the crate only ever sees whole
//! [`Frame`]s. The cryptographic channel itself is assumed to be provided by
//! the deployment; the connection key only identifies this instance.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;

use ed25519_dalek::SigningKey;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_util::codec::Framed;

use signctrl_protocol::{Frame, ProtocolError, SignerCodec, SignerRequest, SignerResponse};

use crate::DialError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One inbound item: `None` once the peer closed the stream.
pub type Inbound = Option<Result<Frame<SignerRequest>, ProtocolError>>;

/// An exclusively-owned, live connection to the validator.
pub trait SignerConnection: Send {
    fn recv(&mut self) -> BoxFuture<'_, Inbound>;

    fn send(&mut self, response: SignerResponse) -> BoxFuture<'_, Result<(), ProtocolError>>;

    /// Close the connection. Calling it again is a no-op.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Performs a single connection attempt; retrying is the supervisor's job.
pub trait Dialer: Send + Sync {
    type Conn: SignerConnection + 'static;

    fn dial<'a>(
        &'a self,
        addr: &'a ValidatorAddr,
        key: &'a SigningKey,
    ) -> BoxFuture<'a, Result<Self::Conn, DialError>>;
}

/// Validator listen address: `tcp://<ipv4>:<port>` or `unix://<path>.sock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl FromStr for ValidatorAddr {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("tcp://") {
            let addr: SocketAddr = rest.parse().map_err(|_| {
                DialError::InvalidAddress(format!("'{s}' is not of the form tcp://<ipv4>:<port>"))
            })?;
            if !addr.is_ipv4() {
                return Err(DialError::InvalidAddress(format!("'{s}' must use an IPv4 address")));
            }
            Ok(ValidatorAddr::Tcp(addr))
        } else if let Some(rest) = s.strip_prefix("unix://") {
            if rest.len() <= ".sock".len() || !rest.ends_with(".sock") {
                return Err(DialError::InvalidAddress(format!(
                    "'{s}' is not of the form unix://<path>.sock"
                )));
            }
            Ok(ValidatorAddr::Unix(PathBuf::from(rest)))
        } else {
            Err(DialError::InvalidAddress(format!(
                "'{s}' must start with tcp:// or unix://"
            )))
        }
    }
}

impl fmt::Display for ValidatorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            ValidatorAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Framed signer-side connection over any byte stream.
pub struct FramedConnection<S> {
    framed: Framed<S, SignerCodec>,
    closed: bool,
}

impl<S> FramedConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, SignerCodec::new()),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<S> SignerConnection for FramedConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn recv(&mut self) -> BoxFuture<'_, Inbound> {
        Box::pin(async move {
            if self.closed {
                tracing::debug!("recv called but connection already closed");
                return None;
            }
            let item = self.framed.next().await;
            if matches!(item, None | Some(Err(_))) {
                self.closed = true;
            }
            item
        })
    }

    fn send(&mut self, response: SignerResponse) -> BoxFuture<'_, Result<(), ProtocolError>> {
        Box::pin(async move {
            if self.closed {
                return Err(ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "connection closed",
                )));
            }
            self.framed.send(response).await
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed {
                self.closed = true;
                if let Err(e) = SinkExt::<SignerResponse>::close(&mut self.framed).await {
                    tracing::debug!(error = %e, "Error while closing connection");
                }
            }
        })
    }
}

/// Either kind of socket the validator may listen on.
pub enum SocketStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for SocketStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            SocketStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            SocketStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            SocketStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            SocketStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Dials real TCP or Unix sockets.
#[derive(Debug, Clone, Default)]
pub struct SocketDialer;

impl Dialer for SocketDialer {
    type Conn = FramedConnection<SocketStream>;

    fn dial<'a>(
        &'a self,
        addr: &'a ValidatorAddr,
        key: &'a SigningKey,
    ) -> BoxFuture<'a, Result<Self::Conn, DialError>> {
        Box::pin(async move {
            let identity = hex::encode(key.verifying_key().as_bytes());
            tracing::debug!(addr = %addr, identity = %identity, "Dialing validator");

            let stream = match addr {
                ValidatorAddr::Tcp(sock) => {
                    let stream = TcpStream::connect(sock).await.map_err(|e| classify(addr, e))?;
                    stream.set_nodelay(true)?;
                    SocketStream::Tcp(stream)
                }
                ValidatorAddr::Unix(path) => {
                    SocketStream::Unix(UnixStream::connect(path).await.map_err(|e| classify(addr, e))?)
                }
            };

            tracing::info!(addr = %addr, "Connected to validator");
            Ok(FramedConnection::new(stream))
        })
    }
}

fn classify(addr: &ValidatorAddr, e: std::io::Error) -> DialError {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
            DialError::Refused(addr.to_string())
        }
        _ => DialError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_addr() {
        let addr: ValidatorAddr = "tcp://127.0.0.1:3000".parse().unwrap();
        assert_eq!(addr, ValidatorAddr::Tcp("127.0.0.1:3000".parse().unwrap()));
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:3000");
    }

    #[test]
    fn test_parse_unix_addr() {
        let addr: ValidatorAddr = "unix:///tmp/validator.sock".parse().unwrap();
        assert_eq!(addr, ValidatorAddr::Unix(PathBuf::from("/tmp/validator.sock")));
    }

    #[test]
    fn test_reject_bad_addrs() {
        for bad in [
            "127.0.0.1:3000",
            "tcp://localhost:3000",
            "tcp://[::1]:3000",
            "tcp://127.0.0.1",
            "unix:///tmp/validator",
            "unix://.sock",
            "http://127.0.0.1:3000",
        ] {
            assert!(bad.parse::<ValidatorAddr>().is_err(), "{bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, _b) = tokio::io::duplex(1024);
        let mut conn = FramedConnection::new(a);
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
        assert!(conn.recv().await.is_none());
        assert!(conn.send(SignerResponse::PingResponse).await.is_err());
    }

    #[tokio::test]
    async fn test_refused_dial_is_retryable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let addr: ValidatorAddr = format!("tcp://127.0.0.1:{port}").parse().unwrap();
        let key = signctrl_protocol::crypto::generate_keypair();
        let err = SocketDialer.dial(&addr, &key).await.err().unwrap();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
