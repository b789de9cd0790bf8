//! The persistent, content-addressed immutable data model (§3, §4.1, §4.2):
//! `Cell`, `Ref`, the canonical binary codec, and the persistent Vector/Map/Set
//! collections. Grounded on `ioi-state::tree::jellyfish` (branching-factor-16
//! nodes addressed by hash) and `ioi-state::tree::iavl`.

#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod cell;
pub mod codec;
pub mod map;
pub mod refs;
pub mod refs_codec;
pub mod set;
pub mod signed;
pub mod vector;

pub use cell::Cell;
pub use codec::CanonicalEncode;
pub use map::PMap;
pub use refs::{CellStore, Ref};
pub use set::PSet;
pub use signed::{Signed, Unverified, Verified};
pub use vector::PVector;
