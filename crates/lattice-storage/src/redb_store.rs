//! The `redb`-backed `CellStore` (§4.8), a single `CELLS` table keyed by the
//! 32-byte cell hash. Grounded on `ioi-storage::redb_epoch_store`'s
//! single-table-per-column-family shape.

use std::path::Path;

use lattice_data::CellStore;
use lattice_types::{DataError, Hash};
use redb::{Database, ReadableTable, TableDefinition};

use crate::sink::CellSink;

const CELLS: TableDefinition<&[u8; 32], &[u8]> = TableDefinition::new("cells");

/// A durable, hash-addressed store backed by an embedded `redb` database
/// file.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self, DataError> {
        let db = Database::create(path).map_err(|e| DataError::Backend(e.to_string()))?;
        let write_txn = db
            .begin_write()
            .map_err(|e| DataError::Backend(e.to_string()))?;
        write_txn
            .open_table(CELLS)
            .map_err(|e| DataError::Backend(e.to_string()))?;
        write_txn
            .commit()
            .map_err(|e| DataError::Backend(e.to_string()))?;
        Ok(RedbStore { db })
    }

    pub fn put(&self, hash: &Hash, bytes: &[u8]) -> Result<(), DataError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| DataError::Backend(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(CELLS)
                .map_err(|e| DataError::Backend(e.to_string()))?;
            table
                .insert(hash.as_bytes(), bytes)
                .map_err(|e| DataError::Backend(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| DataError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl CellStore for RedbStore {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, DataError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| DataError::Backend(e.to_string()))?;
        let table = read_txn
            .open_table(CELLS)
            .map_err(|e| DataError::Backend(e.to_string()))?;
        let value = table
            .get(hash.as_bytes())
            .map_err(|e| DataError::Backend(e.to_string()))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }
}

impl CellSink for RedbStore {
    fn store_bytes(&self, hash: &Hash, bytes: &[u8]) -> Result<(), DataError> {
        self.put(hash, bytes)
    }
}
