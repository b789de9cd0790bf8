//! Core identifiers, error types and protocol constants shared by every
//! crate in the Lattice consensus core.

#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod denom;
pub mod error;
pub mod ids;
pub mod params;

pub use denom::Denomination;
pub use error::{ConsensusProtocolError, DataError, ErrorCode, LatticeError, VmErrorKind};
pub use ids::{Address, AccountKey, Hash};
pub use params::ConsensusParams;
