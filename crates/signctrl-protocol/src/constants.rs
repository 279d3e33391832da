/// Maximum size in bytes of a single remote-signer message body.
pub const MAX_REMOTE_SIGNER_MSG_SIZE: usize = 1024 * 10;

/// Size of the big-endian length prefix in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default file name of the validator key.
pub const KEY_FILE: &str = "priv_validator_key.json";

/// Default file name of the validator's last-sign state.
pub const STATE_FILE: &str = "priv_validator_state.json";

/// Default file name of the transport identity key.
pub const CONN_KEY_FILE: &str = "conn.key";

// Remote signer error codes carried in `RemoteSignerError::code`.
pub const CODE_NOT_AUTHORITATIVE: i32 = 1;
pub const CODE_SIGNING_FAILED: i32 = 2;
pub const CODE_CHAIN_ID_MISMATCH: i32 = 3;
pub const CODE_PUB_KEY_UNAVAILABLE: i32 = 4;
