//! The store adapter (§4.8): a hash-addressed `CellStore` backed by `redb`,
//! an in-memory variant for tests, and novelty notification.

#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod memory;
pub mod novelty;
pub mod redb_store;
pub mod sink;

pub use memory::MemoryStore;
pub use novelty::NoveltySink;
pub use redb_store::RedbStore;
pub use sink::CellSink;
