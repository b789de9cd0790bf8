//! Ed25519 sign/verify over cell hashes (§4.3), plus the SHA-256 hasher used
//! to derive a cell's hash (§4.1). Grounded on `ioi-crypto::sign::eddsa` and
//! `ioi-crypto::algorithms::hash`, built on `dcrypt`.

pub mod error;
pub mod hash;
pub mod sign;

pub use error::CryptoError;
pub use hash::sha256;
pub use sign::{KeyPair, PublicKey, Signature};
