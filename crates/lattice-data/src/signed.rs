//! Signature verification as a type-state transition (§4.3, §9 design
//! note): an `Unverified<T>` carries a signer, a signature, and a payload
//! that has not yet been checked; `verify` is the only way to obtain a
//! `Verified<T>`, and nothing downstream can construct one by any other
//! path.

use lattice_crypto::{PublicKey, Signature};
use lattice_types::{AccountKey, ConsensusProtocolError, LatticeError};

use crate::codec::CanonicalEncode;

/// Anything that can be signed: it has a canonical encoding, which is what
/// gets signed and verified.
pub trait Signed: CanonicalEncode {}
impl<T: CanonicalEncode> Signed for T {}

/// A signed payload whose signature has not yet been checked.
#[derive(Clone, Debug)]
pub struct Unverified<T> {
    signer: AccountKey,
    signature: Signature,
    payload: T,
}

impl<T: Signed + Clone> Unverified<T> {
    pub fn new(signer: AccountKey, signature: Signature, payload: T) -> Self {
        Unverified {
            signer,
            signature,
            payload,
        }
    }

    pub fn signer(&self) -> &AccountKey {
        &self.signer
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// The sole path from `Unverified` to `Verified` (§4.3, §9).
    pub fn verify(&self) -> Result<Verified<T>, LatticeError> {
        let public_key = PublicKey::from_bytes(self.signer.as_bytes())
            .map_err(|e| ConsensusProtocolError::BadSignature(e.to_string()))?;
        public_key
            .verify(&self.payload.encode(), &self.signature)
            .map_err(|e| ConsensusProtocolError::BadSignature(e.to_string()))?;
        Ok(Verified {
            signer: self.signer,
            signature: self.signature.clone(),
            payload: self.payload.clone(),
        })
    }
}

/// A signed payload whose signature has been checked against its signer.
/// Constructible only via [`Unverified::verify`].
#[derive(Clone, Debug)]
pub struct Verified<T> {
    signer: AccountKey,
    signature: Signature,
    payload: T,
}

impl<T> Verified<T> {
    pub fn signer(&self) -> &AccountKey {
        &self.signer
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}
