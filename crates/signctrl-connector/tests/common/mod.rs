#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::DateTime;
use ed25519_dalek::SigningKey;
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use signctrl_connector::transport::{BoxFuture, Inbound};
use signctrl_connector::{
    DialError, DialPolicy, Dialer, FramedConnection, SignerConnection, ValidatorAddr,
};
use signctrl_protocol::crypto::load_or_create_keypair;
use signctrl_protocol::*;

pub const CHAIN_ID: &str = "testchain";

pub type ValidatorEnd = Framed<DuplexStream, ValidatorCodec>;

/// Signer-side connection that counts the `close()` calls that shut it and
/// can be told to fail every write.
pub struct CountingConnection {
    inner: FramedConnection<DuplexStream>,
    closes: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
}

impl SignerConnection for CountingConnection {
    fn recv(&mut self) -> BoxFuture<'_, Inbound> {
        self.inner.recv()
    }

    fn send(&mut self, response: SignerResponse) -> BoxFuture<'_, Result<(), ProtocolError>> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Box::pin(async {
                Err(ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "write failed",
                )))
            });
        }
        self.inner.send(response)
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        if !self.inner.is_closed() {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.close()
    }
}

/// In-memory dialer: every successful dial hands the validator end of a
/// duplex pipe to the test.
pub struct PipeDialer {
    refusals_left: AtomicU32,
    refuse_all: AtomicBool,
    fail_sends: Arc<AtomicBool>,
    dials: AtomicUsize,
    closes: Mutex<Vec<Arc<AtomicUsize>>>,
    validators: mpsc::UnboundedSender<ValidatorEnd>,
}

impl PipeDialer {
    pub fn new(refusals: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<ValidatorEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = Arc::new(Self {
            refusals_left: AtomicU32::new(refusals),
            refuse_all: AtomicBool::new(false),
            fail_sends: Arc::new(AtomicBool::new(false)),
            dials: AtomicUsize::new(0),
            closes: Mutex::new(Vec::new()),
            validators: tx,
        });
        (dialer, rx)
    }

    /// Attempts made so far, refused ones included.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Times the n-th established connection was shut by `close()`.
    pub fn closes(&self, n: usize) -> usize {
        self.closes.lock().unwrap()[n].load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.closes.lock().unwrap().len()
    }

    /// Refuse every dial from now on.
    pub fn refuse_all(&self) {
        self.refuse_all.store(true, Ordering::SeqCst);
    }

    /// Make writes on every connection fail (or succeed again).
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

/// Shared handle so tests keep inspecting the dialer after handing it over.
#[derive(Clone)]
pub struct SharedDialer(pub Arc<PipeDialer>);

impl Dialer for SharedDialer {
    type Conn = CountingConnection;

    fn dial<'a>(
        &'a self,
        addr: &'a ValidatorAddr,
        _key: &'a SigningKey,
    ) -> BoxFuture<'a, Result<Self::Conn, DialError>> {
        Box::pin(async move {
            let d = &self.0;
            d.dials.fetch_add(1, Ordering::SeqCst);
            let refused = d.refuse_all.load(Ordering::SeqCst)
                || d
                    .refusals_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
            if refused {
                return Err(DialError::Refused(addr.to_string()));
            }

            let (signer_io, validator_io) = tokio::io::duplex(64 * 1024);
            let closes = Arc::new(AtomicUsize::new(0));
            d.closes.lock().unwrap().push(closes.clone());
            let _ = d.validators.send(Framed::new(validator_io, ValidatorCodec::new()));
            Ok(CountingConnection {
                inner: FramedConnection::new(signer_io),
                closes,
                fail_sends: d.fail_sends.clone(),
            })
        })
    }
}

pub fn addr() -> ValidatorAddr {
    "tcp://127.0.0.1:3000".parse().unwrap()
}

pub fn fast_policy() -> DialPolicy {
    DialPolicy {
        retry_interval: Duration::from_millis(10),
        max_retry_interval: Duration::from_millis(40),
    }
}

pub fn write_conn_key(dir: &Path) -> std::path::PathBuf {
    let path = dir.join(CONN_KEY_FILE);
    load_or_create_keypair(&path).unwrap();
    path
}

pub fn vote(height: i64) -> Vote {
    Vote {
        msg_type: SignedMsgType::Prevote,
        height,
        round: 0,
        block_id: Some(BlockId {
            hash: "aa".repeat(32),
            part_set_hash: "bb".repeat(32),
        }),
        timestamp: DateTime::from_timestamp(1_700_000_000 + height, 0).unwrap(),
        validator_address: String::new(),
        validator_index: 0,
        signature: None,
    }
}

pub fn sign_vote_request(height: i64) -> SignerRequest {
    SignerRequest::SignVoteRequest {
        vote: vote(height),
        chain_id: CHAIN_ID.into(),
    }
}

/// Send one request and wait for its response.
pub async fn exchange(validator: &mut ValidatorEnd, request: SignerRequest) -> SignerResponse {
    validator.send(request).await.unwrap();
    match tokio::time::timeout(Duration::from_secs(2), validator.next()).await {
        Ok(Some(Ok(Frame::Message(resp)))) => resp,
        other => panic!("no response: {other:?}"),
    }
}

pub async fn next_validator(rx: &mut mpsc::UnboundedReceiver<ValidatorEnd>) -> ValidatorEnd {
    tokio::time::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("timed out waiting for a dial")
        .expect("dialer dropped")
}
