mod common;

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use signctrl_connector::{
    shared_rank, ConnectionSupervisor, ConnectorError, ControllerLoop, DialError, Dispatcher,
    Termination,
};
use signctrl_protocol::*;
use signctrl_state::{RankController, RankError};

use common::*;

struct Harness {
    dialer: std::sync::Arc<PipeDialer>,
    validators: mpsc::UnboundedReceiver<ValidatorEnd>,
    stop: CancellationToken,
    fatal_tx: mpsc::Sender<RankError>,
    task: tokio::task::JoinHandle<Result<Termination, ConnectorError>>,
    dir: tempfile::TempDir,
}

fn spawn_loop(rank: u32, refusals: u32, liveness: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let key_path = write_conn_key(dir.path());
    let signer =
        FilePrivValidator::load_or_generate(&dir.path().join(KEY_FILE), &dir.path().join(STATE_FILE))
            .unwrap();

    let (dialer, validators) = PipeDialer::new(refusals);
    let stop = CancellationToken::new();
    let (fatal_tx, fatal_rx) = mpsc::channel(1);

    let supervisor = ConnectionSupervisor::new(
        SharedDialer(dialer.clone()),
        addr(),
        key_path,
        fast_policy(),
        stop.clone(),
    );
    let dispatcher = Dispatcher::new(
        signer,
        shared_rank(RankController::new(3, rank).unwrap()),
        CHAIN_ID,
    );
    let controller = ControllerLoop::new(supervisor, dispatcher, liveness, stop.clone(), fatal_rx);
    let task = tokio::spawn(controller.connect_and_run());

    Harness {
        dialer,
        validators,
        stop,
        fatal_tx,
        task,
        dir,
    }
}

async fn finish(task: tokio::task::JoinHandle<Result<Termination, ConnectorError>>) -> Result<Termination, ConnectorError> {
    tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("controller loop did not terminate")
        .unwrap()
}

#[tokio::test]
async fn test_serves_requests_until_stopped() {
    let mut h = spawn_loop(1, 0, Duration::from_secs(5));
    let mut v = next_validator(&mut h.validators).await;

    assert_eq!(exchange(&mut v, SignerRequest::PingRequest).await, SignerResponse::PingResponse);
    let resp = exchange(&mut v, sign_vote_request(1)).await;
    assert!(resp.is_signed());

    h.stop.cancel();
    h.stop.cancel();
    assert_eq!(finish(h.task).await.unwrap(), Termination::Stopped);
    assert_eq!(h.dialer.closes(0), 1);
    assert!(v.next().await.is_none());
}

#[tokio::test]
async fn test_standby_declines_over_the_wire() {
    let mut h = spawn_loop(2, 0, Duration::from_secs(5));
    let mut v = next_validator(&mut h.validators).await;

    let resp = exchange(&mut v, sign_vote_request(1)).await;
    assert!(!resp.is_signed());
    assert_eq!(resp.error().unwrap().code, CODE_NOT_AUTHORITATIVE);

    h.stop.cancel();
    finish(h.task).await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    use tokio::io::AsyncWriteExt;

    let mut h = spawn_loop(1, 0, Duration::from_secs(5));
    let mut v = next_validator(&mut h.validators).await;

    let junk = b"not json";
    v.get_mut().write_all(&(junk.len() as u32).to_be_bytes()).await.unwrap();
    v.get_mut().write_all(junk).await.unwrap();

    assert_eq!(exchange(&mut v, SignerRequest::PingRequest).await, SignerResponse::PingResponse);
    assert_eq!(h.dialer.connections(), 1);

    h.stop.cancel();
    finish(h.task).await.unwrap();
}

#[tokio::test]
async fn test_liveness_timeout_reconnects_once() {
    let mut h = spawn_loop(1, 0, Duration::from_millis(200));
    let mut first = next_validator(&mut h.validators).await;
    assert_eq!(exchange(&mut first, SignerRequest::PingRequest).await, SignerResponse::PingResponse);

    // Stay silent: the loop gives up on this connection and dials again
    let mut second = next_validator(&mut h.validators).await;
    assert_eq!(h.dialer.closes(0), 1);
    assert!(first.next().await.is_none());

    assert_eq!(exchange(&mut second, SignerRequest::PingRequest).await, SignerResponse::PingResponse);
    assert_eq!(h.dialer.connections(), 2);

    h.stop.cancel();
    assert_eq!(finish(h.task).await.unwrap(), Termination::Stopped);
    assert_eq!(h.dialer.closes(0), 1);
    assert_eq!(h.dialer.closes(1), 1);
}

#[tokio::test]
async fn test_refused_dials_are_retried() {
    let mut h = spawn_loop(1, 3, Duration::from_secs(5));
    let mut v = next_validator(&mut h.validators).await;
    assert_eq!(h.dialer.dials(), 4);
    assert_eq!(exchange(&mut v, SignerRequest::PingRequest).await, SignerResponse::PingResponse);

    h.stop.cancel();
    finish(h.task).await.unwrap();
}

#[tokio::test]
async fn test_stop_interrupts_dial_retries() {
    let h = spawn_loop(1, u32::MAX, Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.dialer.dials() >= 2);

    h.stop.cancel();
    assert_eq!(finish(h.task).await.unwrap(), Termination::Stopped);
    assert_eq!(h.dialer.connections(), 0);
}

#[tokio::test]
async fn test_must_shutdown_terminates_loop() {
    let mut h = spawn_loop(1, 0, Duration::from_secs(5));
    let _v = next_validator(&mut h.validators).await;

    h.fatal_tx.send(RankError::MustShutdown).await.unwrap();
    assert_eq!(finish(h.task).await.unwrap(), Termination::MustShutdown);
    assert_eq!(h.dialer.closes(0), 1);
}

#[tokio::test]
async fn test_missing_conn_key_is_fatal_on_redial() {
    let mut h = spawn_loop(1, 0, Duration::from_millis(150));
    let _v = next_validator(&mut h.validators).await;

    std::fs::remove_file(h.dir.path().join(CONN_KEY_FILE)).unwrap();

    let err = finish(h.task).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Dial(DialError::KeyUnavailable(_))), "{err}");
    assert_eq!(h.dialer.closes(0), 1);
    assert_eq!(h.dialer.connections(), 1);
}

#[tokio::test]
async fn test_must_shutdown_while_reconnecting() {
    let mut h = spawn_loop(1, 0, Duration::from_millis(150));
    let mut first = next_validator(&mut h.validators).await;
    h.dialer.refuse_all();

    // Stay silent so the loop drops the connection and keeps redialing
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while h.dialer.dials() < 3 {
        assert!(tokio::time::Instant::now() < deadline, "loop never redialed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!h.task.is_finished());

    h.fatal_tx.send(RankError::MustShutdown).await.unwrap();
    assert_eq!(finish(h.task).await.unwrap(), Termination::MustShutdown);
    assert_eq!(h.dialer.closes(0), 1);
    assert_eq!(h.dialer.connections(), 1);
    assert!(first.next().await.is_none());
}

#[tokio::test]
async fn test_failed_write_keeps_serving() {
    use futures::SinkExt;

    let mut h = spawn_loop(1, 0, Duration::from_secs(5));
    let mut v = next_validator(&mut h.validators).await;

    h.dialer.fail_sends(true);
    v.send(SignerRequest::PingRequest).await.unwrap();
    assert!(tokio::time::timeout(Duration::from_millis(200), v.next()).await.is_err());
    assert!(!h.task.is_finished());

    h.dialer.fail_sends(false);
    assert_eq!(exchange(&mut v, SignerRequest::PingRequest).await, SignerResponse::PingResponse);
    assert_eq!(h.dialer.connections(), 1);
    assert_eq!(h.dialer.closes(0), 0);

    h.stop.cancel();
    assert_eq!(finish(h.task).await.unwrap(), Termination::Stopped);
}
