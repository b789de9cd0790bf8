//! The CVM (§4.4): a deterministic bytecode interpreter that applies
//! transactions to world state, metered by juice.

#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod env;
pub mod exec;
pub mod ops;
pub mod state;
pub mod transaction;

pub use env::Env;
pub use exec::{
    apply_block, apply_transaction, execute_query, BlockResult, ExecResult, TransactionResult, Vm,
    JUICE_PRICE,
};
pub use ops::Op;
pub use state::{Account, ScheduledCall, WorldState};
pub use transaction::Transaction;
