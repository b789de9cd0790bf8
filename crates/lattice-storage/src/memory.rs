//! An in-memory `CellStore`, for tests and anywhere the `redb` backend is
//! unwarranted.

use std::collections::BTreeMap;

use lattice_data::{Cell, CanonicalEncode, CellStore};
use lattice_types::{DataError, Hash};
use parking_lot::RwLock;

use crate::sink::CellSink;

/// A `BTreeMap`-backed store keyed by cell hash.
#[derive(Default)]
pub struct MemoryStore {
    cells: RwLock<BTreeMap<Hash, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes and inserts `cell`, returning its hash.
    pub fn put(&self, cell: &Cell) -> Hash {
        let hash = cell.hash();
        self.cells.write().insert(hash, cell.encode());
        hash
    }

    pub fn len(&self) -> usize {
        self.cells.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CellStore for MemoryStore {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, DataError> {
        Ok(self.cells.read().get(hash).cloned())
    }
}

impl CellSink for MemoryStore {
    fn store_bytes(&self, hash: &Hash, bytes: &[u8]) -> Result<(), DataError> {
        self.cells.write().insert(*hash, bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        let hash = store.put(&Cell::Long(42));
        let bytes = store.get(&hash).unwrap().unwrap();
        assert_eq!(Cell::decode(&bytes).unwrap(), Cell::Long(42));
    }

    #[test]
    fn missing_hash_returns_none() {
        let store = MemoryStore::new();
        let missing = Cell::Long(1).hash();
        assert_eq!(store.get(&missing).unwrap(), None);
    }
}
