//! World state (§4.4): accounts (balance, sequence, environment) plus a
//! time-ordered schedule of pending calls, all held in persistent `Cell`
//! collections so a `WorldState` hashes the same way any other cell does.

use lattice_data::codec::{read_vlc_i64, write_vlc_i64};
use lattice_data::{CanonicalEncode, Cell, CellStore, PMap, PVector};
use lattice_types::{Address, DataError};

use crate::env::Env;
use crate::ops::Op;

const KEY_BALANCE: &str = "balance";
const KEY_SEQUENCE: &str = "sequence";
const KEY_ENVIRONMENT: &str = "environment";
const KEY_ACCOUNTS: &str = "accounts";
const KEY_SCHEDULE: &str = "schedule";

/// One account's balance, sequence number, and environment (§4.4).
#[derive(Clone, Debug)]
pub struct Account {
    pub balance: i64,
    pub sequence: u64,
    pub environment: Env,
}

impl Account {
    pub fn new(balance: i64) -> Self {
        Account {
            balance,
            sequence: 0,
            environment: Env::empty(),
        }
    }

    fn to_cell(&self) -> Cell {
        Cell::Map(
            PMap::empty()
                .assoc(
                    &lattice_data::refs::NullStore,
                    Cell::Keyword(KEY_BALANCE.into()),
                    Cell::Long(self.balance),
                )
                .unwrap_or_else(|_| PMap::empty())
                .assoc(
                    &lattice_data::refs::NullStore,
                    Cell::Keyword(KEY_SEQUENCE.into()),
                    Cell::Long(self.sequence as i64),
                )
                .unwrap_or_else(|_| PMap::empty())
                .assoc(
                    &lattice_data::refs::NullStore,
                    Cell::Keyword(KEY_ENVIRONMENT.into()),
                    Cell::Map(self.environment.clone().into_map()),
                )
                .unwrap_or_else(|_| PMap::empty()),
        )
    }

    fn from_cell(cell: &Cell, store: &dyn CellStore) -> Result<Self, DataError> {
        let map = cell
            .as_map()
            .ok_or_else(|| DataError::MalformedEncoding("account is not a map".into()))?;
        let balance = map
            .get(store, &Cell::Keyword(KEY_BALANCE.into()))?
            .and_then(|c| c.as_long())
            .ok_or_else(|| DataError::MalformedEncoding("account missing balance".into()))?;
        let sequence = map
            .get(store, &Cell::Keyword(KEY_SEQUENCE.into()))?
            .and_then(|c| c.as_long())
            .ok_or_else(|| DataError::MalformedEncoding("account missing sequence".into()))?
            as u64;
        let environment = map
            .get(store, &Cell::Keyword(KEY_ENVIRONMENT.into()))?
            .and_then(|c| c.as_map().cloned())
            .map(Env::from_map)
            .unwrap_or_else(Env::empty);
        Ok(Account {
            balance,
            sequence,
            environment,
        })
    }
}

/// A call pending execution at or before a given timestamp (§4.4's
/// schedule).
#[derive(Clone, Debug)]
pub struct ScheduledCall {
    pub timestamp: i64,
    pub target: Address,
    pub form: Op,
}

impl ScheduledCall {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.target.as_bytes());
        write_vlc_i64(&mut out, self.timestamp);
        out.extend_from_slice(&self.form.encode());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, DataError> {
        let target_bytes = bytes
            .get(..Address::LEN)
            .ok_or_else(|| DataError::MalformedEncoding("scheduled call target truncated".into()))?;
        let target = Address::from_bytes(target_bytes)
            .ok_or_else(|| DataError::MalformedEncoding("bad target length".into()))?;
        let (timestamp, len) = read_vlc_i64(&bytes[Address::LEN..])?;
        let form = Op::decode(&bytes[Address::LEN + len..])?;
        Ok(ScheduledCall {
            timestamp,
            target,
            form,
        })
    }
}

/// The full world state applied by the VM: accounts and a pending
/// schedule.
#[derive(Clone, Debug, Default)]
pub struct WorldState {
    accounts: PMap,
    schedule: Vec<ScheduledCall>,
}

impl WorldState {
    pub fn empty() -> Self {
        WorldState {
            accounts: PMap::empty(),
            schedule: Vec::new(),
        }
    }

    pub fn get_account(
        &self,
        store: &dyn CellStore,
        address: &Address,
    ) -> Result<Option<Account>, DataError> {
        match self.accounts.get(store, &Cell::Address(*address))? {
            Some(cell) => Ok(Some(Account::from_cell(&cell, store)?)),
            None => Ok(None),
        }
    }

    pub fn set_account(
        &self,
        store: &dyn CellStore,
        address: Address,
        account: Account,
    ) -> Result<Self, DataError> {
        Ok(WorldState {
            accounts: self
                .accounts
                .assoc(store, Cell::Address(address), account.to_cell())?,
            schedule: self.schedule.clone(),
        })
    }

    /// Atomic balance transfer (§4.4). Fails with a caller-supplied error
    /// if `source`'s balance is insufficient.
    pub fn transfer(
        &self,
        store: &dyn CellStore,
        source: Address,
        dest: Address,
        amount: i64,
    ) -> Result<Self, lattice_types::VmErrorKind> {
        let mut source_account = self
            .get_account(store, &source)
            .map_err(|e| lattice_types::VmErrorKind::State(e.to_string()))?
            .ok_or(lattice_types::VmErrorKind::Nobody)?;
        if source_account.balance < amount {
            return Err(lattice_types::VmErrorKind::Funds);
        }
        let mut dest_account = self
            .get_account(store, &dest)
            .map_err(|e| lattice_types::VmErrorKind::State(e.to_string()))?
            .unwrap_or_else(|| Account::new(0));
        source_account.balance -= amount;
        dest_account.balance += amount;
        let next = self
            .set_account(store, source, source_account)
            .map_err(|e| lattice_types::VmErrorKind::State(e.to_string()))?;
        next.set_account(store, dest, dest_account)
            .map_err(|e| lattice_types::VmErrorKind::State(e.to_string()))
    }

    /// Every scheduled call due at or before `timestamp`, removed from the
    /// schedule, oldest first (§4.4).
    pub fn drain_due(&self, timestamp: i64) -> (Self, Vec<ScheduledCall>) {
        let mut due = Vec::new();
        let mut remaining = Vec::new();
        for call in &self.schedule {
            if call.timestamp <= timestamp {
                due.push(call.clone());
            } else {
                remaining.push(call.clone());
            }
        }
        due.sort_by_key(|c| c.timestamp);
        (
            WorldState {
                accounts: self.accounts.clone(),
                schedule: remaining,
            },
            due,
        )
    }

    pub fn schedule_call(&self, call: ScheduledCall) -> Self {
        let mut schedule = self.schedule.clone();
        schedule.push(call);
        WorldState {
            accounts: self.accounts.clone(),
            schedule,
        }
    }

    /// Converts to a `Cell` so a whole world state hashes and persists the
    /// same way any other value does (§4.1, §4.8).
    pub fn to_cell(&self) -> Cell {
        let schedule_cells = self
            .schedule
            .iter()
            .map(|call| Cell::Blob(call.encode()))
            .collect();
        let store = lattice_data::refs::NullStore;
        Cell::Map(
            PMap::empty()
                .assoc(&store, Cell::Keyword(KEY_ACCOUNTS.into()), Cell::Map(self.accounts.clone()))
                .unwrap_or_else(|_| PMap::empty())
                .assoc(
                    &store,
                    Cell::Keyword(KEY_SCHEDULE.into()),
                    Cell::Vector(PVector::from_cells(schedule_cells)),
                )
                .unwrap_or_else(|_| PMap::empty()),
        )
    }

    pub fn from_cell(cell: &Cell, store: &dyn CellStore) -> Result<Self, DataError> {
        let map = cell
            .as_map()
            .ok_or_else(|| DataError::MalformedEncoding("world state is not a map".into()))?;
        let accounts = map
            .get(store, &Cell::Keyword(KEY_ACCOUNTS.into()))?
            .and_then(|c| c.as_map().cloned())
            .ok_or_else(|| DataError::MalformedEncoding("world state missing accounts".into()))?;
        let schedule_vector = map
            .get(store, &Cell::Keyword(KEY_SCHEDULE.into()))?
            .and_then(|c| c.as_vector_like().cloned())
            .ok_or_else(|| DataError::MalformedEncoding("world state missing schedule".into()))?;
        let mut schedule = Vec::with_capacity(schedule_vector.count());
        for i in 0..schedule_vector.count() {
            match schedule_vector.get(i, store)? {
                Cell::Blob(bytes) => schedule.push(ScheduledCall::decode(&bytes)?),
                _ => {
                    return Err(DataError::MalformedEncoding(
                        "schedule entry is not a blob".into(),
                    ))
                }
            }
        }
        Ok(WorldState { accounts, schedule })
    }
}
