//! Ed25519 sign/verify (§4.3). `sign` signs a cell's hash; `verify` checks
//! the signature against the payload hash and the declared public key.
//! Signatures are 64 bytes, canonical, not malleable.

use crate::error::CryptoError;
use dcrypt::api::Signature as SignatureTrait;
use dcrypt::sign::eddsa::{
    Ed25519, Ed25519PublicKey, Ed25519SecretKey, Ed25519Signature,
};
use rand::rngs::OsRng;

/// A 64-byte Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 64 {
            return Err(CryptoError::InvalidSignature(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 64];
        out.copy_from_slice(bytes);
        Ok(Signature(out))
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Ok(PublicKey(out))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verifies `signature` over `message`, returning `Ok(())` only if
    /// valid. Never promotes unverified data — callers decide what to do
    /// with the boolean-shaped result (see `lattice-data::signed::Unverified`).
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let pk = Ed25519PublicKey::from_bytes(&self.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let sig = Ed25519Signature::from_bytes(&signature.0)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Ed25519::verify(message, &sig, &pk).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

/// An Ed25519 key pair capable of signing.
#[derive(Clone)]
pub struct KeyPair {
    public: Ed25519PublicKey,
    secret: Ed25519SecretKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the OS random number generator.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = OsRng;
        let (public, secret) = Ed25519::keypair(&mut rng)?;
        Ok(Self { public, secret })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.public.0)
    }

    /// Signs `message` (expected to be a cell's hash) and returns the
    /// 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, CryptoError> {
        let sig = Ed25519::sign(message, &self.secret)?;
        Ok(Signature(sig.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let kp = KeyPair::generate().unwrap();
        let msg = b"a cell's hash, 32 bytes of it pretend";
        let sig = kp.sign(msg).unwrap();
        kp.public_key().verify(msg, &sig).unwrap();
    }

    #[test]
    fn flipped_signature_bit_fails_verification() {
        let kp = KeyPair::generate().unwrap();
        let msg = b"some payload hash";
        let mut sig = kp.sign(msg).unwrap();
        sig.0[0] ^= 0x01;
        assert!(kp.public_key().verify(msg, &sig).is_err());
    }

    #[test]
    fn flipped_payload_bit_fails_verification() {
        let kp = KeyPair::generate().unwrap();
        let msg = b"some payload hash";
        let sig = kp.sign(msg).unwrap();
        let mut tampered = msg.to_vec();
        tampered[0] ^= 0x01;
        assert!(kp.public_key().verify(&tampered, &sig).is_err());
    }
}
