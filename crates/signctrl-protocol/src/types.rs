use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Consensus message kinds that can carry a validator signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignedMsgType {
    Prevote,
    Precommit,
    Proposal,
}

impl SignedMsgType {
    /// Step ordering within one round: proposal < prevote < precommit.
    pub fn step(&self) -> u8 {
        match self {
            Self::Proposal => 1,
            Self::Prevote => 2,
            Self::Precommit => 3,
        }
    }

    pub fn is_vote(&self) -> bool {
        matches!(self, Self::Prevote | Self::Precommit)
    }
}

impl std::fmt::Display for SignedMsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Prevote => "prevote",
            Self::Precommit => "precommit",
            Self::Proposal => "proposal",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    /// Hex-encoded block hash.
    pub hash: String,
    /// Hex-encoded part set header hash.
    pub part_set_hash: String,
}

/// Public key as exposed to the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKey {
    #[serde(rename = "type")]
    pub key_type: String,
    /// Hex-encoded key bytes.
    pub value: String,
}

impl PubKey {
    pub fn ed25519(bytes: &[u8]) -> Self {
        Self {
            key_type: "ed25519".to_string(),
            value: hex::encode(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "type")]
    pub msg_type: SignedMsgType,
    pub height: i64,
    pub round: i32,
    /// `None` for a nil vote.
    pub block_id: Option<BlockId>,
    pub timestamp: DateTime<Utc>,
    pub validator_address: String,
    pub validator_index: i32,
    /// Hex-encoded signature, filled in by the signer.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(rename = "type")]
    pub msg_type: SignedMsgType,
    pub height: i64,
    pub round: i32,
    pub pol_round: i32,
    pub block_id: BlockId,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signature: Option<String>,
}

/// Canonical vote form that gets signed. Field order is fixed.
#[derive(Serialize)]
struct CanonicalVote<'a> {
    chain_id: &'a str,
    #[serde(rename = "type")]
    msg_type: SignedMsgType,
    height: i64,
    round: i32,
    block_id: Option<&'a BlockId>,
    timestamp: &'a DateTime<Utc>,
}

#[derive(Serialize)]
struct CanonicalProposal<'a> {
    chain_id: &'a str,
    #[serde(rename = "type")]
    msg_type: SignedMsgType,
    height: i64,
    round: i32,
    pol_round: i32,
    block_id: &'a BlockId,
    timestamp: &'a DateTime<Utc>,
}

impl Vote {
    /// Bytes covered by the vote signature for the given chain.
    pub fn sign_bytes(&self, chain_id: &str) -> Result<Vec<u8>, ProtocolError> {
        if !self.msg_type.is_vote() {
            return Err(ProtocolError::InvalidMessage(format!(
                "vote has non-vote type {}",
                self.msg_type
            )));
        }
        let canonical = CanonicalVote {
            chain_id,
            msg_type: self.msg_type,
            height: self.height,
            round: self.round,
            block_id: self.block_id.as_ref(),
            timestamp: &self.timestamp,
        };
        Ok(serde_json::to_vec(&canonical)?)
    }
}

impl Proposal {
    /// Bytes covered by the proposal signature for the given chain.
    pub fn sign_bytes(&self, chain_id: &str) -> Result<Vec<u8>, ProtocolError> {
        if self.msg_type != SignedMsgType::Proposal {
            return Err(ProtocolError::InvalidMessage(format!(
                "proposal has type {}",
                self.msg_type
            )));
        }
        let canonical = CanonicalProposal {
            chain_id,
            msg_type: self.msg_type,
            height: self.height,
            round: self.round,
            pol_round: self.pol_round,
            block_id: &self.block_id,
            timestamp: &self.timestamp,
        };
        Ok(serde_json::to_vec(&canonical)?)
    }
}
