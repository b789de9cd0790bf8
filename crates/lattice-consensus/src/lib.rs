//! Block, Order, Belief and the leaderless merge protocol (§4.5, §4.6):
//! the consensus layer that decides which blocks are finalized, built on
//! top of `lattice-vm`'s transaction application and `lattice-data`'s
//! signed-payload type-state.

#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod belief;
pub mod block;
pub mod merge;
pub mod order;
pub mod state;

pub use belief::Belief;
pub use block::Block;
pub use merge::{merge, MergeContext};
pub use order::Order;
pub use state::ConsensusState;
