use serde::{Deserialize, Serialize};

use crate::types::{Proposal, PubKey, Vote};

/// A request sent by the validator to its remote signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignerRequest {
    PubKeyRequest { chain_id: String },
    SignVoteRequest { vote: Vote, chain_id: String },
    SignProposalRequest { proposal: Proposal, chain_id: String },
    PingRequest,
}

impl SignerRequest {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PubKeyRequest { .. } => "pub_key_request",
            Self::SignVoteRequest { .. } => "sign_vote_request",
            Self::SignProposalRequest { .. } => "sign_proposal_request",
            Self::PingRequest => "ping_request",
        }
    }

    /// Whether answering needs signing authority.
    pub fn is_signing_request(&self) -> bool {
        matches!(
            self,
            Self::SignVoteRequest { .. } | Self::SignProposalRequest { .. }
        )
    }

    /// Height the request refers to, if any.
    pub fn height(&self) -> Option<i64> {
        match self {
            Self::SignVoteRequest { vote, .. } => Some(vote.height),
            Self::SignProposalRequest { proposal, .. } => Some(proposal.height),
            _ => None,
        }
    }
}

/// A response sent by the remote signer back to the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignerResponse {
    PubKeyResponse {
        pub_key: Option<PubKey>,
        error: Option<RemoteSignerError>,
    },
    SignedVoteResponse {
        vote: Option<Vote>,
        error: Option<RemoteSignerError>,
    },
    SignedProposalResponse {
        proposal: Option<Proposal>,
        error: Option<RemoteSignerError>,
    },
    PingResponse,
}

impl SignerResponse {
    pub fn error(&self) -> Option<&RemoteSignerError> {
        match self {
            Self::PubKeyResponse { error, .. }
            | Self::SignedVoteResponse { error, .. }
            | Self::SignedProposalResponse { error, .. } => error.as_ref(),
            Self::PingResponse => None,
        }
    }

    /// True for a response that carries a genuine signature.
    pub fn is_signed(&self) -> bool {
        match self {
            Self::SignedVoteResponse { vote: Some(v), error: None } => v.signature.is_some(),
            Self::SignedProposalResponse {
                proposal: Some(p),
                error: None,
            } => p.signature.is_some(),
            _ => false,
        }
    }
}

/// Error variant of a response, used for declinations as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSignerError {
    pub code: i32,
    pub description: String,
}

impl RemoteSignerError {
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

impl std::fmt::Display for RemoteSignerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote signer error {}: {}", self.code, self.description)
    }
}
