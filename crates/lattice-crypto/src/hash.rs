//! SHA-256 hashing, used by `lattice-data` to derive a cell's hash from its
//! canonical encoding (§4.1: `hash = SHA-256(encoding)`).

use crate::error::CryptoError;
use dcrypt::algorithms::hash::sha2::Sha256 as DcryptSha256;
use dcrypt::algorithms::hash::HashFunction;
use dcrypt::algorithms::ByteSerializable;

/// Hashes `message` with SHA-256, returning the 32-byte digest.
pub fn sha256(message: &[u8]) -> Result<[u8; 32], CryptoError> {
    let digest = DcryptSha256::digest(message).map_err(dcrypt::Error::from)?;
    let bytes = digest.to_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = sha256(b"hello").unwrap();
        let b = sha256(b"hello").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_differs_for_different_input() {
        let a = sha256(b"hello").unwrap();
        let b = sha256(b"hellp").unwrap();
        assert_ne!(a, b);
    }
}
