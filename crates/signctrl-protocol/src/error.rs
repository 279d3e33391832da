use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message too large: {size} bytes (limit: {limit})")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Height regression: got {got}, last signed {last}")]
    HeightRegression { got: i64, last: i64 },

    #[error("Round regression at height {height}: got {got}, last signed {last}")]
    RoundRegression { height: i64, got: i32, last: i32 },

    #[error("Step regression at height {height} round {round}: got {got}, last signed {last}")]
    StepRegression {
        height: i64,
        round: i32,
        got: u8,
        last: u8,
    },

    #[error("Conflicting data at height {height} round {round} step {step}")]
    ConflictingData { height: i64, round: i32, step: u8 },
}
