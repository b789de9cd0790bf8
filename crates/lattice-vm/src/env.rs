//! Environments-as-maps (§4.4): every account owns an environment from
//! symbol to value; lookup walks the account environment, then falls back
//! to a shared core environment. Grounded on `ioi-system`'s
//! environment-as-map-of-bindings pattern.

use lattice_data::{Cell, CellStore, PMap};
use lattice_types::DataError;

/// A symbol-to-value binding map, backed by the persistent [`PMap`] so it
/// participates in the same content-addressed state tree as everything
/// else (§4.4, §3).
#[derive(Clone, Debug, Default)]
pub struct Env {
    bindings: PMap,
}

impl Env {
    pub fn empty() -> Self {
        Env {
            bindings: PMap::empty(),
        }
    }

    pub fn lookup(&self, store: &dyn CellStore, symbol: &str) -> Result<Option<Cell>, DataError> {
        self.bindings.get(store, &Cell::Symbol(symbol.to_string()))
    }

    /// `def` (§4.4): installs a binding, returning the updated environment.
    pub fn define(
        &self,
        store: &dyn CellStore,
        symbol: &str,
        value: Cell,
    ) -> Result<Self, DataError> {
        Ok(Env {
            bindings: self
                .bindings
                .assoc(store, Cell::Symbol(symbol.to_string()), value)?,
        })
    }

    pub fn into_map(self) -> PMap {
        self.bindings
    }

    pub fn from_map(bindings: PMap) -> Self {
        Env { bindings }
    }
}
