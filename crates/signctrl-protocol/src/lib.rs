//! SignCTRL Protocol - remote-signer wire types and signing delegate
//!
//! Defines the messages exchanged between a validator and its detachable
//! remote signer, the length-delimited frame codec carrying them, and the
//! Ed25519 signing capability that only an authoritative signer may use.

pub mod codec;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod messages;
pub mod signer;
pub mod types;

pub use codec::{Frame, FrameCodec, SignerCodec, ValidatorCodec};
pub use constants::*;
pub use error::*;
pub use messages::*;
pub use signer::{FilePrivValidator, LastSignState, SigningDelegate};
pub use types::*;
