//! A write-capable store (§4.8, §4.7's `persist_state`): a `CellStore` that
//! also accepts new cell bytes, so `Peer::persist_state` can hold one trait
//! object over either backing store.

use lattice_data::CellStore;
use lattice_types::{DataError, Hash};

/// `CellStore` plus the ability to durably record a cell's encoded bytes
/// under its hash. Named `store_bytes` rather than `put` so it never
/// collides with `MemoryStore`'s existing inherent `put(&Cell) -> Hash`.
pub trait CellSink: CellStore {
    fn store_bytes(&self, hash: &Hash, bytes: &[u8]) -> Result<(), DataError>;
}
