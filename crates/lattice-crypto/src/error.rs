use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("hashing failed: {0}")]
    HashingFailed(String),
}

impl From<dcrypt::Error> for CryptoError {
    fn from(e: dcrypt::Error) -> Self {
        CryptoError::SigningFailed(e.to_string())
    }
}
