//! `Ref`: a handle to a cell that is either in memory, known only by hash,
//! durably persisted, or announced as novel (§4.1).
//!
//! Transitions are monotone: `Direct -> Persisted -> Announced`. A separate
//! `Hashed` state holds only the hash until a store lookup resolves it back
//! to `Direct`. This mirrors `ioi-storage::adapter`'s `NodeHash`-keyed
//! lookups, generalized from tree nodes to arbitrary cells.

use std::sync::Arc;

use lattice_types::{DataError, Hash};

use crate::cell::Cell;
use crate::codec::CanonicalEncode;

/// Embedding threshold (§4.1): a cell below this encoded size, with no
/// hashed children, is serialized inline rather than by hash.
pub const EMBED_THRESHOLD: usize = 140;

/// A key-value store addressed by the 32-byte hash of a canonical encoding
/// (§4.8). Implemented by `lattice-storage`'s in-memory and `redb`-backed
/// stores; a blanket trait object so `lattice-data` does not depend on
/// `lattice-storage`.
pub trait CellStore {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, DataError>;
}

/// A handle to a [`Cell`], monotonically progressing
/// `Direct -> Persisted -> Announced`, or starting as `Hashed` when only the
/// hash is known.
#[derive(Clone, Debug)]
pub enum Ref {
    /// The cell value is in memory.
    Direct(Arc<Cell>),
    /// Only the hash is known; resolving requires a store lookup.
    Hashed(Hash),
    /// Known to exist durably, with the value still held in memory.
    Persisted(Hash, Arc<Cell>),
    /// Marked novel and dispatched to the novelty handler.
    Announced(Hash, Arc<Cell>),
}

impl Ref {
    pub fn new(cell: Cell) -> Self {
        Ref::Direct(Arc::new(cell))
    }

    pub fn from_hash(hash: Hash) -> Self {
        Ref::Hashed(hash)
    }

    /// The hash of the referenced cell, computing it from the in-memory
    /// value if necessary.
    pub fn hash(&self) -> Hash {
        match self {
            Ref::Direct(c) => c.hash(),
            Ref::Hashed(h) | Ref::Persisted(h, _) | Ref::Announced(h, _) => *h,
        }
    }

    /// `true` if the value is already in memory (`Direct`, `Persisted`, or
    /// `Announced`).
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Ref::Hashed(_))
    }

    /// Returns the in-memory value without touching the store, if any is
    /// held.
    pub fn peek(&self) -> Option<&Cell> {
        match self {
            Ref::Direct(c) | Ref::Persisted(_, c) | Ref::Announced(_, c) => Some(c),
            Ref::Hashed(_) => None,
        }
    }

    /// Resolves this ref to its cell, performing a store lookup only if the
    /// ref is `Hashed`.
    pub fn resolve(&self, store: &dyn CellStore) -> Result<Arc<Cell>, DataError> {
        match self {
            Ref::Direct(c) | Ref::Persisted(_, c) | Ref::Announced(_, c) => Ok(c.clone()),
            Ref::Hashed(hash) => {
                let bytes = store
                    .get(hash)?
                    .ok_or_else(|| DataError::NotFound(hash.to_string()))?;
                let cell = Cell::decode(&bytes)?;
                let got = cell.hash();
                if got != *hash {
                    return Err(DataError::HashMismatch {
                        expected: hash.to_string(),
                        got: got.to_string(),
                    });
                }
                Ok(Arc::new(cell))
            }
        }
    }

    /// `Direct -> Persisted`. No-op (returns a clone) for any other state,
    /// since the transition is monotone and must not regress.
    pub fn to_persisted(&self) -> Self {
        match self {
            Ref::Direct(c) => Ref::Persisted(c.hash(), c.clone()),
            other => other.clone(),
        }
    }

    /// `Persisted -> Announced`. No-op for any other state.
    pub fn to_announced(&self) -> Self {
        match self {
            Ref::Persisted(h, c) => Ref::Announced(*h, c.clone()),
            Ref::Direct(c) => Ref::Announced(c.hash(), c.clone()),
            other => other.clone(),
        }
    }

    /// `true` if this ref's cell, once resolved, is small enough and has no
    /// hashed children, making it eligible for inline (embedded) encoding
    /// (§4.1).
    pub fn is_embedded(&self) -> bool {
        match self.peek() {
            Some(cell) => {
                cell.encode().len() < EMBED_THRESHOLD
                    && cell.child_refs().iter().all(Ref::is_resolved)
            }
            None => false,
        }
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}
impl Eq for Ref {}

/// A store with nothing in it. Used by pure in-memory builders (e.g.
/// `PVector::from_cells`) where every ref is already `Direct` and no lookup
/// is ever actually performed.
#[derive(Default)]
pub struct NullStore;

impl CellStore for NullStore {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>, DataError> {
        Err(DataError::NotFound(format!(
            "NullStore holds nothing (looked up {hash})"
        )))
    }
}
