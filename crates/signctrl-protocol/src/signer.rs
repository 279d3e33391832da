//! Signing capability delegated to by the dispatcher.
//!
//! The dispatcher only reaches a [`SigningDelegate`] while its instance holds
//! rank 1. [`FilePrivValidator`] is the file-backed implementation: the key
//! lives in `priv_validator_key.json` and the last signed height/round/step
//! in `priv_validator_state.json`, which also guards against signing two
//! different payloads for the same step.

use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto;
use crate::{Proposal, ProtocolError, PubKey, SignedMsgType, Vote};

/// Produces genuine signatures and exposes the validator public key.
pub trait SigningDelegate: Send {
    fn public_key(&self) -> Result<PubKey, ProtocolError>;

    /// Sign `vote` in place for `chain_id`.
    fn sign_vote(&mut self, chain_id: &str, vote: &mut Vote) -> Result<(), ProtocolError>;

    /// Sign `proposal` in place for `chain_id`.
    fn sign_proposal(&mut self, chain_id: &str, proposal: &mut Proposal) -> Result<(), ProtocolError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    address: String,
    pub_key: PubKey,
    priv_key: PrivKeyRecord,
}

#[derive(Debug, Serialize, Deserialize)]
struct PrivKeyRecord {
    #[serde(rename = "type")]
    key_type: String,
    /// Hex-encoded 32-byte seed.
    value: String,
}

/// Height/round/step of the last signature produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastSignState {
    pub height: i64,
    pub round: i32,
    pub step: u8,
    /// Hex-encoded signature of the last signed payload.
    pub signature: Option<String>,
    /// Hex-encoded last signed payload.
    pub sign_bytes: Option<String>,
}

impl LastSignState {
    /// Reject regressions. Returns `true` if the HRS equals the last signed one.
    pub fn check_hrs(&self, height: i64, round: i32, step: u8) -> Result<bool, ProtocolError> {
        if self.height > height {
            return Err(ProtocolError::HeightRegression { got: height, last: self.height });
        }
        if self.height == height {
            if self.round > round {
                return Err(ProtocolError::RoundRegression {
                    height,
                    got: round,
                    last: self.round,
                });
            }
            if self.round == round {
                if self.step > step {
                    return Err(ProtocolError::StepRegression {
                        height,
                        round,
                        got: step,
                        last: self.step,
                    });
                }
                if self.step == step {
                    if self.sign_bytes.is_none() {
                        return Err(ProtocolError::ConflictingData { height, round, step });
                    }
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

pub struct FilePrivValidator {
    key: SigningKey,
    address: String,
    state: LastSignState,
    state_path: PathBuf,
}

impl std::fmt::Debug for FilePrivValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePrivValidator")
            .field("address", &self.address)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl FilePrivValidator {
    /// Load key and state. A missing state file starts from an empty state.
    pub fn load(key_path: &Path, state_path: &Path) -> Result<Self, ProtocolError> {
        let bytes = std::fs::read(key_path).map_err(|e| {
            ProtocolError::Crypto(format!("read key file {}: {e}", key_path.display()))
        })?;
        let mut record: KeyFile = serde_json::from_slice(&bytes)?;
        if record.priv_key.key_type != "ed25519" {
            return Err(ProtocolError::Crypto(format!(
                "unsupported key type {}",
                record.priv_key.key_type
            )));
        }
        let seed = hex::decode(&record.priv_key.value);
        record.priv_key.value.zeroize();
        let seed = seed.map_err(|e| ProtocolError::Crypto(format!("invalid key hex: {e}")))?;
        let key = crypto::keypair_from_seed(seed)?;

        let address = crypto::derive_address(&key.verifying_key());
        if record.address != address {
            return Err(ProtocolError::Crypto(format!(
                "key file address {} does not match key ({address})",
                record.address
            )));
        }

        let state = if state_path.exists() {
            serde_json::from_slice(&std::fs::read(state_path)?)?
        } else {
            LastSignState::default()
        };

        Ok(Self {
            key,
            address,
            state,
            state_path: state_path.to_path_buf(),
        })
    }

    /// Load the key file, generating one first if it does not exist.
    pub fn load_or_generate(key_path: &Path, state_path: &Path) -> Result<Self, ProtocolError> {
        if !key_path.exists() {
            Self::generate_key_file(key_path)?;
        }
        Self::load(key_path, state_path)
    }

    fn generate_key_file(key_path: &Path) -> Result<(), ProtocolError> {
        let key = crypto::generate_keypair();
        let verifying_key = key.verifying_key();
        let record = KeyFile {
            address: crypto::derive_address(&verifying_key),
            pub_key: PubKey::ed25519(verifying_key.as_bytes()),
            priv_key: PrivKeyRecord {
                key_type: "ed25519".to_string(),
                value: hex::encode(key.to_bytes()),
            },
        };
        let mut json = serde_json::to_vec_pretty(&record)?;
        let written = crypto::write_private_file(key_path, &json);
        json.zeroize();
        written?;
        tracing::info!(address = %record.address, path = %key_path.display(), "Generated validator key");
        Ok(())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn last_sign_state(&self) -> &LastSignState {
        &self.state
    }

    /// Sign `sign_bytes` at the given HRS, honouring the last-sign state.
    fn sign_checked(
        &mut self,
        height: i64,
        round: i32,
        step: u8,
        sign_bytes: &[u8],
    ) -> Result<String, ProtocolError> {
        let encoded = hex::encode(sign_bytes);
        if self.state.check_hrs(height, round, step)? {
            if self.state.sign_bytes.as_deref() == Some(encoded.as_str()) {
                if let Some(sig) = &self.state.signature {
                    tracing::debug!(height, round, step, "Reusing signature for identical payload");
                    return Ok(sig.clone());
                }
            }
            return Err(ProtocolError::ConflictingData { height, round, step });
        }

        let signature = hex::encode(crypto::sign_message(&self.key, sign_bytes).to_bytes());
        let next = LastSignState {
            height,
            round,
            step,
            signature: Some(signature.clone()),
            sign_bytes: Some(encoded),
        };

        // The state must hit the disk before the signature is released.
        self.save_state(&next)?;
        self.state = next;
        Ok(signature)
    }

    fn save_state(&self, state: &LastSignState) -> Result<(), ProtocolError> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &self.state_path)?;
        Ok(())
    }
}

impl SigningDelegate for FilePrivValidator {
    fn public_key(&self) -> Result<PubKey, ProtocolError> {
        Ok(PubKey::ed25519(self.key.verifying_key().as_bytes()))
    }

    fn sign_vote(&mut self, chain_id: &str, vote: &mut Vote) -> Result<(), ProtocolError> {
        let sign_bytes = vote.sign_bytes(chain_id)?;
        let sig = self.sign_checked(vote.height, vote.round, vote.msg_type.step(), &sign_bytes)?;
        vote.signature = Some(sig);
        Ok(())
    }

    fn sign_proposal(&mut self, chain_id: &str, proposal: &mut Proposal) -> Result<(), ProtocolError> {
        let sign_bytes = proposal.sign_bytes(chain_id)?;
        let sig = self.sign_checked(
            proposal.height,
            proposal.round,
            SignedMsgType::Proposal.step(),
            &sign_bytes,
        )?;
        proposal.signature = Some(sig);
        Ok(())
    }
}
