//! Request handling and the per-iteration decision step of the controller loop.
//!
//! A signature is only ever produced while the rank lock is held at rank 1.
//! Every other rank answers signing requests with a declination and never
//! reaches the signer.

use signctrl_protocol::{
    Frame, ProtocolError, RemoteSignerError, SignerRequest, SignerResponse, SigningDelegate,
    CODE_CHAIN_ID_MISMATCH, CODE_NOT_AUTHORITATIVE, CODE_PUB_KEY_UNAVAILABLE, CODE_SIGNING_FAILED,
};

use signctrl_state::RankController;

use crate::controller::Termination;
use crate::SharedRank;

/// One input to the controller loop's decision point.
#[derive(Debug)]
pub enum LoopEvent {
    /// External stop signal.
    Stop,
    /// No message arrived within the liveness window.
    LivenessTimeout,
    /// The rank controller reported that this instance must shut down.
    RankShutdown,
    /// Result of reading the next frame; `None` means the peer hung up.
    Inbound(Option<Result<Frame<SignerRequest>, ProtocolError>>),
}

/// What the loop does in response to a [`LoopEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Respond(SignerResponse),
    Idle,
    /// The stream ended; wait for the liveness timer to trigger a redial.
    StreamClosed,
    Reconnect,
    Terminate(Termination),
}

pub struct Dispatcher<S: SigningDelegate> {
    signer: S,
    rank: SharedRank,
    chain_id: String,
}

impl<S: SigningDelegate> Dispatcher<S> {
    pub fn new(signer: S, rank: SharedRank, chain_id: impl Into<String>) -> Self {
        Self {
            signer,
            rank,
            chain_id: chain_id.into(),
        }
    }

    pub fn rank(&self) -> &SharedRank {
        &self.rank
    }

    pub fn signer(&self) -> &S {
        &self.signer
    }

    /// Decide what to do with one loop event.
    pub async fn step(&mut self, event: LoopEvent) -> Action {
        match event {
            LoopEvent::Stop => Action::Terminate(Termination::Stopped),
            LoopEvent::RankShutdown => Action::Terminate(Termination::MustShutdown),
            LoopEvent::LivenessTimeout => Action::Reconnect,
            LoopEvent::Inbound(None) => {
                tracing::warn!("Validator closed the connection");
                Action::StreamClosed
            }
            LoopEvent::Inbound(Some(Err(e))) => {
                tracing::warn!(error = %e, "Couldn't read from connection");
                Action::StreamClosed
            }
            LoopEvent::Inbound(Some(Ok(Frame::Malformed(reason)))) => {
                tracing::warn!(reason = %reason, "Dropped malformed message");
                Action::Idle
            }
            LoopEvent::Inbound(Some(Ok(Frame::Message(request)))) => {
                Action::Respond(self.handle_request(request).await)
            }
        }
    }

    pub async fn handle_request(&mut self, request: SignerRequest) -> SignerResponse {
        tracing::debug!(kind = request.kind(), height = ?request.height(), "Received request");

        match request {
            SignerRequest::PingRequest => SignerResponse::PingResponse,

            SignerRequest::PubKeyRequest { chain_id } => {
                if let Some(err) = self.check_chain_id(&chain_id) {
                    return SignerResponse::PubKeyResponse {
                        pub_key: None,
                        error: Some(err),
                    };
                }
                match self.signer.public_key() {
                    Ok(pub_key) => SignerResponse::PubKeyResponse {
                        pub_key: Some(pub_key),
                        error: None,
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "Couldn't get public key");
                        SignerResponse::PubKeyResponse {
                            pub_key: None,
                            error: Some(RemoteSignerError::new(CODE_PUB_KEY_UNAVAILABLE, e.to_string())),
                        }
                    }
                }
            }

            SignerRequest::SignVoteRequest { mut vote, chain_id } => {
                if let Some(err) = self.check_chain_id(&chain_id) {
                    return SignerResponse::SignedVoteResponse {
                        vote: None,
                        error: Some(err),
                    };
                }

                // Held until the response is built so the rank can't change mid-decision.
                let mut rank = self.rank.lock().await;
                if !rank.is_authoritative() {
                    tracing::debug!(rank = rank.rank(), height = vote.height, "Declined to sign vote");
                    return SignerResponse::SignedVoteResponse {
                        vote: None,
                        error: Some(not_authoritative(&rank)),
                    };
                }

                match self.signer.sign_vote(&self.chain_id, &mut vote) {
                    Ok(()) => {
                        rank.reset();
                        tracing::info!(
                            height = vote.height,
                            round = vote.round,
                            step = %vote.msg_type,
                            "Signed vote"
                        );
                        SignerResponse::SignedVoteResponse {
                            vote: Some(vote),
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::error!(height = vote.height, error = %e, "Couldn't sign vote");
                        SignerResponse::SignedVoteResponse {
                            vote: None,
                            error: Some(RemoteSignerError::new(CODE_SIGNING_FAILED, e.to_string())),
                        }
                    }
                }
            }

            SignerRequest::SignProposalRequest {
                mut proposal,
                chain_id,
            } => {
                if let Some(err) = self.check_chain_id(&chain_id) {
                    return SignerResponse::SignedProposalResponse {
                        proposal: None,
                        error: Some(err),
                    };
                }

                let mut rank = self.rank.lock().await;
                if !rank.is_authoritative() {
                    tracing::debug!(rank = rank.rank(), height = proposal.height, "Declined to sign proposal");
                    return SignerResponse::SignedProposalResponse {
                        proposal: None,
                        error: Some(not_authoritative(&rank)),
                    };
                }

                match self.signer.sign_proposal(&self.chain_id, &mut proposal) {
                    Ok(()) => {
                        rank.reset();
                        tracing::info!(
                            height = proposal.height,
                            round = proposal.round,
                            "Signed proposal"
                        );
                        SignerResponse::SignedProposalResponse {
                            proposal: Some(proposal),
                            error: None,
                        }
                    }
                    Err(e) => {
                        tracing::error!(height = proposal.height, error = %e, "Couldn't sign proposal");
                        SignerResponse::SignedProposalResponse {
                            proposal: None,
                            error: Some(RemoteSignerError::new(CODE_SIGNING_FAILED, e.to_string())),
                        }
                    }
                }
            }
        }
    }

    fn check_chain_id(&self, chain_id: &str) -> Option<RemoteSignerError> {
        if chain_id == self.chain_id {
            return None;
        }
        tracing::warn!(expected = %self.chain_id, got = %chain_id, "Request for unexpected chain");
        Some(RemoteSignerError::new(
            CODE_CHAIN_ID_MISMATCH,
            format!("expected chain id {}, got {chain_id}", self.chain_id),
        ))
    }
}

fn not_authoritative(rank: &RankController) -> RemoteSignerError {
    let description = if rank.must_shutdown() {
        "signer is shutting down".to_string()
    } else {
        format!("signer has rank {}, only rank 1 signs", rank.rank())
    };
    RemoteSignerError::new(CODE_NOT_AUTHORITATIVE, description)
}
