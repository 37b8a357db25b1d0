use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("authenticated decryption failed (bad MAC or wrong key)")]
    AuthFailed,

    #[error("frame has the wrong length: expected {expected}, got {actual}")]
    BadFrameLen { expected: usize, actual: usize },
}
