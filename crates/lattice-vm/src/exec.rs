//! The CVM interpreter (§4.4): `(State, Transaction) -> Context`, a pure
//! function with no external source of non-determinism. Grounded on
//! `ioi-execution`'s transaction-application pipeline shape, generalized
//! with a juice meter and the non-local-exit `ExecResult` from the design
//! note in §9.

use lattice_data::refs::NullStore;
use lattice_data::{CanonicalEncode, Cell, CellStore, PVector};
use lattice_types::{Address, ConsensusParams, VmErrorKind};

use crate::env::Env;
use crate::ops::Op;
use crate::state::{ScheduledCall, WorldState};

/// Juice cost of evaluating any single Op (§4.4: "every Op has a fixed
/// cost").
const OP_COST: i64 = 1;
/// Additional juice cost of invoking a callable, standing in for a
/// primitive's table-specific cost.
const INVOKE_COST: i64 = 10;
/// Copper charged per unit of juice consumed (§4.4, §6).
pub const JUICE_PRICE: i64 = 1;

/// The non-local-exit tagged variants an Op evaluation can produce (§9
/// design note).
#[derive(Clone, Debug)]
pub enum ExecResult {
    Value(Cell),
    Halt,
    Recur(Vec<Cell>),
    Return(Cell),
    Tailcall(Cell, Vec<Cell>),
    Error(VmErrorKind, String),
}

impl ExecResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ExecResult::Error(..))
    }

    /// Whether evaluation of an enclosing `Do`/`Let` body must stop here:
    /// an error or any of the control-flow exits (§4.4's HALT/RECUR/RETURN/
    /// TAILCALL kinds), as opposed to a plain value that evaluation should
    /// continue past.
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecResult::Error(..)
                | ExecResult::Halt
                | ExecResult::Recur(..)
                | ExecResult::Return(..)
                | ExecResult::Tailcall(..)
        )
    }

    pub fn into_value(self) -> Result<Cell, (VmErrorKind, String)> {
        match self {
            ExecResult::Value(c) | ExecResult::Return(c) => Ok(c),
            ExecResult::Error(kind, msg) => Err((kind, msg)),
            ExecResult::Halt => Err((VmErrorKind::State("halted".into()), "halt".into())),
            ExecResult::Recur(_) => Err((
                VmErrorKind::State("recur outside loop".into()),
                "recur".into(),
            )),
            ExecResult::Tailcall(..) => Err((
                VmErrorKind::State("tailcall outside invoke".into()),
                "tailcall".into(),
            )),
        }
    }
}

/// A closure's parameter names, body, and the lexical stack captured at
/// its creation, as recovered by [`Vm::as_closure`].
type ClosureParts = (Vec<String>, Vec<Op>, Vec<Vec<Cell>>);

/// The running context of one evaluation (§4.4): signer identity, special
/// symbols, the lexical stack, world state, and the remaining juice.
pub struct Context<'a> {
    pub store: &'a dyn CellStore,
    pub state: WorldState,
    pub address: Address,
    pub caller: Address,
    pub origin: Address,
    pub balance: i64,
    pub timestamp: i64,
    pub sequence: u64,
    pub juice: i64,
    env: Env,
    lexical: Vec<Vec<Cell>>,
}

impl<'a> Context<'a> {
    fn charge(&mut self, cost: i64) -> Result<(), ExecResult> {
        self.juice -= cost;
        if self.juice <= 0 {
            return Err(ExecResult::Error(VmErrorKind::Juice, "out of juice".into()));
        }
        Ok(())
    }

    fn special(&self, name: &str) -> Option<Cell> {
        match name {
            "*address*" => Some(Cell::Address(self.address)),
            "*caller*" => Some(Cell::Address(self.caller)),
            "*origin*" => Some(Cell::Address(self.origin)),
            "*balance*" => Some(Cell::Long(self.balance)),
            "*timestamp*" => Some(Cell::Long(self.timestamp)),
            "*juice*" => Some(Cell::Long(self.juice)),
            "*sequence*" => Some(Cell::Long(self.sequence as i64)),
            "*state*" => Some(self.state.to_cell()),
            _ => None,
        }
    }
}

/// The CVM. Stateless: every call takes the state it needs and returns a
/// fresh one.
pub struct Vm;

impl Vm {
    /// Evaluates `op` against `ctx`, threading the lexical stack and
    /// environment through recursive sub-evaluations.
    pub fn eval(op: &Op, ctx: &mut Context) -> ExecResult {
        if let Err(e) = ctx.charge(OP_COST) {
            return e;
        }
        match op {
            Op::Constant(c) => ExecResult::Value(c.clone()),
            Op::Do(ops) => {
                let mut last = ExecResult::Value(Cell::Nil);
                for sub in ops {
                    last = Self::eval(sub, ctx);
                    if last.is_terminal() {
                        return last;
                    }
                }
                last
            }
            Op::Lookup(symbol) => {
                if let Some(cell) = ctx.special(symbol) {
                    return ExecResult::Value(cell);
                }
                match ctx.env.lookup(ctx.store, symbol) {
                    Ok(Some(cell)) => ExecResult::Value(cell),
                    Ok(None) => ExecResult::Error(
                        VmErrorKind::Undeclared(symbol.clone()),
                        format!("undeclared symbol: {symbol}"),
                    ),
                    Err(e) => ExecResult::Error(VmErrorKind::State(e.to_string()), e.to_string()),
                }
            }
            Op::Def(symbol, value_op) => {
                let value = match Self::eval(value_op, ctx) {
                    ExecResult::Value(c) => c,
                    other => return other,
                };
                match ctx.env.define(ctx.store, symbol, value.clone()) {
                    Ok(env) => {
                        ctx.env = env;
                        ExecResult::Value(value)
                    }
                    Err(e) => ExecResult::Error(VmErrorKind::State(e.to_string()), e.to_string()),
                }
            }
            Op::Let(bindings, body) => {
                let mut frame = Vec::with_capacity(bindings.len());
                for binding in bindings {
                    match Self::eval(binding, ctx) {
                        ExecResult::Value(c) => frame.push(c),
                        other => return other,
                    }
                }
                ctx.lexical.push(frame);
                let mut last = ExecResult::Value(Cell::Nil);
                for sub in body {
                    last = Self::eval(sub, ctx);
                    if last.is_terminal() {
                        break;
                    }
                }
                ctx.lexical.pop();
                last
            }
            Op::Local(n) => match ctx.lexical.last().and_then(|frame| frame.get(*n)) {
                Some(c) => ExecResult::Value(c.clone()),
                None => ExecResult::Error(
                    VmErrorKind::Argument(format!("no lexical slot {n}")),
                    "lexical slot out of range".into(),
                ),
            },
            Op::Set(n, value_op) => {
                let value = match Self::eval(value_op, ctx) {
                    ExecResult::Value(c) => c,
                    other => return other,
                };
                match ctx.lexical.last_mut().and_then(|frame| frame.get_mut(*n)) {
                    Some(slot) => {
                        *slot = value.clone();
                        ExecResult::Value(value)
                    }
                    None => ExecResult::Error(
                        VmErrorKind::Argument(format!("no lexical slot {n}")),
                        "lexical slot out of range".into(),
                    ),
                }
            }
            Op::Cond(test, then_op, else_op) => match Self::eval(test, ctx) {
                ExecResult::Value(Cell::Bool(false)) | ExecResult::Value(Cell::Nil) => {
                    Self::eval(else_op, ctx)
                }
                ExecResult::Value(_) => Self::eval(then_op, ctx),
                other => other,
            },
            Op::Lambda(params, body) => {
                ExecResult::Value(Self::make_closure(params, body, &ctx.lexical))
            }
            Op::Invoke(callee, args) => {
                if let Err(e) = ctx.charge(INVOKE_COST) {
                    return e;
                }
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    match Self::eval(arg, ctx) {
                        ExecResult::Value(c) => evaluated.push(c),
                        other => return other,
                    }
                }
                let callee_value = match Self::eval(callee, ctx) {
                    ExecResult::Value(c) => c,
                    other => return other,
                };
                Self::invoke_primitive(&callee_value, &evaluated, ctx)
            }
            Op::Query(inner) => Self::eval(inner, ctx),
            Op::Special(name, args) => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    match Self::eval(arg, ctx) {
                        ExecResult::Value(c) => evaluated.push(c),
                        other => return other,
                    }
                }
                Self::invoke_special(name, &evaluated, ctx)
            }
        }
    }

    /// Builds the first-class value a `Lambda` Op evaluates to: its
    /// parameter names, its body (re-encoded through `Op`'s own canonical
    /// codec so it round-trips through persistent storage like any other
    /// cell), and the lexical stack captured at closure-creation time.
    /// Tagged with a leading `*closure*` keyword so [`Self::as_closure`]
    /// can tell a lambda value apart from an ordinary vector.
    fn make_closure(params: &[String], body: &[Op], lexical: &[Vec<Cell>]) -> Cell {
        let params_cell = Cell::Vector(PVector::from_cells(
            params.iter().cloned().map(Cell::Symbol).collect(),
        ));
        let body_cell = Cell::Blob(Op::Do(body.to_vec()).encode());
        let captured_cell = Cell::Vector(PVector::from_cells(
            lexical
                .iter()
                .map(|frame| Cell::Vector(PVector::from_cells(frame.clone())))
                .collect(),
        ));
        Cell::Vector(PVector::from_cells(vec![
            Cell::Keyword("*closure*".into()),
            params_cell,
            body_cell,
            captured_cell,
        ]))
    }

    /// The inverse of [`Self::make_closure`]: recovers the parameter names,
    /// body, and captured lexical stack from a value produced by evaluating
    /// a `Lambda` Op, or `None` if `cell` isn't shaped like one.
    fn as_closure(cell: &Cell) -> Option<ClosureParts> {
        let v = cell.as_vector_like()?;
        if v.count() != 4 {
            return None;
        }
        if !matches!(v.get(0, &NullStore).ok()?, Cell::Keyword(tag) if tag == "*closure*") {
            return None;
        }
        let params = v
            .get(1, &NullStore)
            .ok()?
            .as_vector_like()?
            .clone();
        let mut param_names = Vec::with_capacity(params.count());
        for i in 0..params.count() {
            match params.get(i, &NullStore).ok()? {
                Cell::Symbol(name) => param_names.push(name),
                _ => return None,
            }
        }
        let body = match v.get(2, &NullStore).ok()? {
            Cell::Blob(bytes) => match Op::decode(&bytes).ok()? {
                Op::Do(ops) => ops,
                other => vec![other],
            },
            _ => return None,
        };
        let captured_vec = v.get(3, &NullStore).ok()?.as_vector_like()?.clone();
        let mut captured = Vec::with_capacity(captured_vec.count());
        for i in 0..captured_vec.count() {
            let frame = captured_vec.get(i, &NullStore).ok()?.as_vector_like()?.clone();
            let mut cells = Vec::with_capacity(frame.count());
            for j in 0..frame.count() {
                cells.push(frame.get(j, &NullStore).ok()?);
            }
            captured.push(cells);
        }
        Some((param_names, body, captured))
    }

    /// Invokes a closure produced by a `Lambda` Op: restores its captured
    /// lexical stack, pushes a fresh frame binding `args` to its parameter
    /// names, and evaluates its body. `recur` re-enters the body with new
    /// argument values in place (§4.4); `return` and `tailcall` unwind to
    /// the invocation's own result rather than the body's loop.
    fn invoke_closure(
        params: &[String],
        body: &[Op],
        captured: &[Vec<Cell>],
        args: &[Cell],
        ctx: &mut Context,
    ) -> ExecResult {
        if args.len() != params.len() {
            return ExecResult::Error(
                VmErrorKind::Argument(format!(
                    "closure expects {} argument(s), got {}",
                    params.len(),
                    args.len()
                )),
                "arity mismatch".into(),
            );
        }
        let saved = std::mem::replace(&mut ctx.lexical, captured.to_vec());
        let mut current_args = args.to_vec();
        let outcome = loop {
            ctx.lexical.push(current_args.clone());
            let mut last = ExecResult::Value(Cell::Nil);
            for op in body {
                last = Self::eval(op, ctx);
                if last.is_terminal() {
                    break;
                }
            }
            ctx.lexical.pop();
            match last {
                ExecResult::Recur(new_args) if new_args.len() == params.len() => {
                    current_args = new_args;
                    continue;
                }
                ExecResult::Recur(new_args) => {
                    break ExecResult::Error(
                        VmErrorKind::Argument(format!(
                            "recur expects {} argument(s), got {}",
                            params.len(),
                            new_args.len()
                        )),
                        "recur arity mismatch".into(),
                    )
                }
                ExecResult::Return(value) => break ExecResult::Value(value),
                ExecResult::Tailcall(callee, tail_args) => {
                    break Self::invoke_primitive(&callee, &tail_args, ctx)
                }
                other => break other,
            }
        };
        ctx.lexical = saved;
        outcome
    }

    /// Every value a `Long` argument list can be read as, or the
    /// type-error result to return in its place.
    fn longs(args: &[Cell]) -> Result<Vec<i64>, ExecResult> {
        args.iter()
            .map(|c| match c {
                Cell::Long(v) => Ok(*v),
                other => Err(ExecResult::Error(
                    VmErrorKind::Cast(format!("expected a long, got {other:?}")),
                    "non-numeric argument".into(),
                )),
            })
            .collect()
    }

    fn arith(name: &str, args: &[Cell]) -> ExecResult {
        let values = match Self::longs(args) {
            Ok(v) => v,
            Err(e) => return e,
        };
        let result = match name {
            "+" => values.iter().try_fold(0i64, |acc, v| acc.checked_add(*v)),
            "*" => values.iter().try_fold(1i64, |acc, v| acc.checked_mul(*v)),
            "-" => match values.as_slice() {
                [] => Some(0),
                [only] => only.checked_neg(),
                [first, rest @ ..] => rest.iter().try_fold(*first, |acc, v| acc.checked_sub(*v)),
            },
            "/" => match values.as_slice() {
                [] | [_] => {
                    return ExecResult::Error(
                        VmErrorKind::Argument("/ expects at least two arguments".into()),
                        "bad arity".into(),
                    )
                }
                [first, rest @ ..] => rest.iter().try_fold(*first, |acc, v| {
                    if *v == 0 {
                        None
                    } else {
                        acc.checked_div(*v)
                    }
                }),
            },
            _ => unreachable!("arith dispatched on a non-arithmetic name"),
        };
        match result {
            Some(v) => ExecResult::Value(Cell::Long(v)),
            None => ExecResult::Error(
                VmErrorKind::Argument(format!("{name} overflowed or divided by zero")),
                "arithmetic error".into(),
            ),
        }
    }

    fn compare(name: &str, args: &[Cell]) -> ExecResult {
        let values = match Self::longs(args) {
            Ok(v) => v,
            Err(e) => return e,
        };
        if values.len() < 2 {
            return ExecResult::Error(
                VmErrorKind::Argument(format!("{name} expects at least two arguments")),
                "bad arity".into(),
            );
        }
        let ok = values.windows(2).all(|pair| match name {
            "=" => pair[0] == pair[1],
            "<" => pair[0] < pair[1],
            ">" => pair[0] > pair[1],
            "<=" => pair[0] <= pair[1],
            ">=" => pair[0] >= pair[1],
            _ => unreachable!("compare dispatched on a non-comparison name"),
        });
        ExecResult::Value(Cell::Bool(ok))
    }

    /// Built-in callables a value can name: a closure produced by `Lambda`,
    /// or a `Keyword`/`Symbol` naming a special form (§4.4).
    fn invoke_primitive(callee: &Cell, args: &[Cell], ctx: &mut Context) -> ExecResult {
        if let Some((params, body, captured)) = Self::as_closure(callee) {
            return Self::invoke_closure(&params, &body, &captured, args, ctx);
        }
        let name = match callee {
            Cell::Keyword(k) | Cell::Symbol(k) => k.clone(),
            _ => {
                return ExecResult::Error(
                    VmErrorKind::Cast("callee is not invocable".into()),
                    "not callable".into(),
                )
            }
        };
        Self::invoke_special(&name, args, ctx)
    }

    fn invoke_special(name: &str, args: &[Cell], ctx: &mut Context) -> ExecResult {
        match name {
            "transfer" => {
                let (dest, amount) = match args {
                    [Cell::Address(dest), Cell::Long(amount)] => (*dest, *amount),
                    _ => {
                        return ExecResult::Error(
                            VmErrorKind::Argument("transfer expects (address, long)".into()),
                            "bad transfer arguments".into(),
                        )

                    }
                };
                match ctx.state.transfer(ctx.store, ctx.address, dest, amount) {
                    Ok(state) => {
                        ctx.state = state;
                        ExecResult::Value(Cell::Bool(true))
                    }
                    Err(kind) => ExecResult::Error(kind.clone(), "transfer failed".into()),
                }
            }
            "+" | "-" | "*" | "/" => Self::arith(name, args),
            "=" | "<" | ">" | "<=" | ">=" => Self::compare(name, args),
            "halt" => ExecResult::Halt,
            "recur" => ExecResult::Recur(args.to_vec()),
            "return" => ExecResult::Return(args.first().cloned().unwrap_or(Cell::Nil)),
            "tailcall" => match args.split_first() {
                Some((callee, rest)) => ExecResult::Tailcall(callee.clone(), rest.to_vec()),
                None => ExecResult::Error(
                    VmErrorKind::Argument("tailcall expects a callee and arguments".into()),
                    "bad tailcall arguments".into(),
                ),
            },
            other => ExecResult::Error(
                VmErrorKind::Undeclared(other.to_string()),
                format!("unknown special form: {other}"),
            ),
        }
    }
}

/// The outcome of applying one transaction to a block (§4.4, §4.7).
#[derive(Clone, Debug)]
pub struct TransactionResult {
    pub result: ExecResult,
    pub juice_used: i64,
}

/// Applies a signed transaction to `state` (§4.4): verifies, checks
/// sequence, deducts max juice up front, evaluates, and either commits or
/// reverts while always keeping the sequence bump and juice deduction.
pub fn apply_transaction(
    store: &dyn CellStore,
    state: &WorldState,
    params: &ConsensusParams,
    signer_address: Address,
    sequence: u64,
    timestamp: i64,
    op: &Op,
) -> Result<(WorldState, TransactionResult), VmErrorKind> {
    let account = state
        .get_account(store, &signer_address)
        .map_err(|e| VmErrorKind::State(e.to_string()))?
        .ok_or(VmErrorKind::Nobody)?;
    if sequence != account.sequence + 1 {
        return Err(VmErrorKind::Sequence {
            expected: account.sequence + 1,
            got: sequence,
        });
    }
    let max_juice = (account.balance / JUICE_PRICE.max(1)).min(params.max_juice as i64);

    let mut debited = account.clone();
    debited.sequence = sequence;
    debited.balance -= max_juice * JUICE_PRICE;
    let debited_state = state
        .set_account(store, signer_address, debited)
        .map_err(|e| VmErrorKind::State(e.to_string()))?;

    let mut ctx = Context {
        store,
        state: debited_state.clone(),
        address: signer_address,
        caller: signer_address,
        origin: signer_address,
        balance: account.balance,
        timestamp,
        sequence,
        juice: max_juice,
        env: account.environment.clone(),
        lexical: Vec::new(),
    };

    let result = Vm::eval(op, &mut ctx);
    let juice_used = max_juice - ctx.juice.max(0);
    let refund = ctx.juice.max(0) * JUICE_PRICE;

    let final_state = if result.is_error() {
        // Revert all mutations but keep the sequence bump and the juice
        // actually consumed (not the whole up-front reservation) deducted
        // (§4.4: "the consumed juice x juice-price is still deducted").
        let mut reverted = account.clone();
        reverted.sequence = sequence;
        reverted.balance -= juice_used * JUICE_PRICE;
        state
            .set_account(store, signer_address, reverted)
            .map_err(|e| VmErrorKind::State(e.to_string()))?
    } else {
        let mut account_after = ctx
            .state
            .get_account(store, &signer_address)
            .map_err(|e| VmErrorKind::State(e.to_string()))?
            .ok_or(VmErrorKind::Nobody)?;
        account_after.balance += refund;
        account_after.environment = ctx.env.clone();
        ctx.state
            .set_account(store, signer_address, account_after)
            .map_err(|e| VmErrorKind::State(e.to_string()))?
    };

    Ok((
        final_state,
        TransactionResult {
            result,
            juice_used,
        },
    ))
}

/// Applies one scheduled call to `state` (§4.4, §4.7). Unlike
/// [`apply_transaction`] this is not a signer-submitted transaction: it
/// carries no sequence number and the account's sequence is left
/// untouched, but juice is metered and deducted exactly the same way,
/// running against `call.target`'s own account and environment.
fn apply_scheduled_call(
    store: &dyn CellStore,
    state: &WorldState,
    params: &ConsensusParams,
    call: &ScheduledCall,
    timestamp: i64,
) -> Result<(WorldState, TransactionResult), VmErrorKind> {
    let account = state
        .get_account(store, &call.target)
        .map_err(|e| VmErrorKind::State(e.to_string()))?
        .ok_or(VmErrorKind::Nobody)?;
    let max_juice = (account.balance / JUICE_PRICE.max(1)).min(params.max_juice as i64);

    let mut debited = account.clone();
    debited.balance -= max_juice * JUICE_PRICE;
    let debited_state = state
        .set_account(store, call.target, debited)
        .map_err(|e| VmErrorKind::State(e.to_string()))?;

    let mut ctx = Context {
        store,
        state: debited_state,
        address: call.target,
        caller: call.target,
        origin: call.target,
        balance: account.balance,
        timestamp,
        sequence: account.sequence,
        juice: max_juice,
        env: account.environment.clone(),
        lexical: Vec::new(),
    };

    let result = Vm::eval(&call.form, &mut ctx);
    let juice_used = max_juice - ctx.juice.max(0);
    let refund = ctx.juice.max(0) * JUICE_PRICE;

    let final_state = if result.is_error() {
        let mut reverted = account.clone();
        reverted.balance -= juice_used * JUICE_PRICE;
        state
            .set_account(store, call.target, reverted)
            .map_err(|e| VmErrorKind::State(e.to_string()))?
    } else {
        let mut account_after = ctx
            .state
            .get_account(store, &call.target)
            .map_err(|e| VmErrorKind::State(e.to_string()))?
            .ok_or(VmErrorKind::Nobody)?;
        account_after.balance += refund;
        account_after.environment = ctx.env.clone();
        ctx.state
            .set_account(store, call.target, account_after)
            .map_err(|e| VmErrorKind::State(e.to_string()))?
    };

    Ok((
        final_state,
        TransactionResult {
            result,
            juice_used,
        },
    ))
}

/// Runs `op` read-only against `address`'s account on `state` (§4.7
/// `execute-query`): no state mutation is ever committed, only the result
/// and juice consumed are reported back.
pub fn execute_query(
    store: &dyn CellStore,
    state: &WorldState,
    params: &ConsensusParams,
    address: Address,
    timestamp: i64,
    op: &Op,
) -> Result<TransactionResult, VmErrorKind> {
    let account = state
        .get_account(store, &address)
        .map_err(|e| VmErrorKind::State(e.to_string()))?
        .ok_or(VmErrorKind::Nobody)?;
    let max_juice = (account.balance / JUICE_PRICE.max(1)).min(params.max_juice as i64);
    let mut ctx = Context {
        store,
        state: state.clone(),
        address,
        caller: address,
        origin: address,
        balance: account.balance,
        timestamp,
        sequence: account.sequence,
        juice: max_juice,
        env: account.environment.clone(),
        lexical: Vec::new(),
    };
    let result = Vm::eval(op, &mut ctx);
    let juice_used = max_juice - ctx.juice.max(0);
    Ok(TransactionResult { result, juice_used })
}

/// The result of applying every transaction in a block (§4.5, §4.7): the
/// post-block state and one [`TransactionResult`] per transaction, in
/// order.
#[derive(Clone, Debug)]
pub struct BlockResult {
    pub transaction_results: Vec<TransactionResult>,
}

/// Applies a block's transactions in order (§4.4: "within a block,
/// transactions execute in order"), first draining every scheduled call
/// due at or before `timestamp` (§4.4, §4.7: scheduled execution is
/// drained before each block).
pub fn apply_block(
    store: &dyn CellStore,
    state: &WorldState,
    params: &ConsensusParams,
    timestamp: i64,
    transactions: &[(Address, u64, Op)],
) -> Result<(WorldState, BlockResult), VmErrorKind> {
    let (mut state, due) = state.drain_due(timestamp);
    let mut transaction_results = Vec::with_capacity(due.len() + transactions.len());

    for call in &due {
        let (next_state, tx_result) = apply_scheduled_call(store, &state, params, call, timestamp)?;
        state = next_state;
        transaction_results.push(tx_result);
    }

    for (signer_address, sequence, op) in transactions {
        let (next_state, tx_result) =
            apply_transaction(store, &state, params, *signer_address, *sequence, timestamp, op)?;
        state = next_state;
        transaction_results.push(tx_result);
    }

    Ok((state, BlockResult { transaction_results }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_data::refs::NullStore;
    use lattice_crypto::KeyPair;
    use crate::state::Account;

    fn addr_from_key(kp: &KeyPair) -> Address {
        Address::from_bytes(kp.public_key().as_bytes()).unwrap()
    }

    #[test]
    fn constant_evaluates_to_itself() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        let (_, tx_result) = apply_transaction(
            &store,
            &state,
            &params,
            addr,
            1,
            0,
            &Op::Constant(Cell::Long(7)),
        )
        .unwrap();
        match tx_result.result {
            ExecResult::Value(Cell::Long(7)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn wrong_sequence_is_rejected() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000))
            .unwrap();
        let params = ConsensusParams::default();
        let err = apply_transaction(
            &store,
            &state,
            &params,
            addr,
            5,
            0,
            &Op::Constant(Cell::Nil),
        )
        .unwrap_err();
        assert_eq!(
            err,
            VmErrorKind::Sequence {
                expected: 1,
                got: 5
            }
        );
    }

    #[test]
    fn def_then_lookup_round_trips_through_account_environment() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        let op = Op::Do(vec![
            Op::Def("x".into(), Box::new(Op::Constant(Cell::Long(9)))),
            Op::Lookup("x".into()),
        ]);
        let (_, tx_result) =
            apply_transaction(&store, &state, &params, addr, 1, 0, &op).unwrap();
        match tx_result.result {
            ExecResult::Value(Cell::Long(9)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn execute_query_leaves_state_untouched() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let dest = Address::from_bytes(&[9u8; 32]).unwrap();
        let params = ConsensusParams::default();
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(params.max_juice as i64 + 1_000))
            .unwrap();
        let op = Op::Invoke(
            Box::new(Op::Constant(Cell::Keyword("transfer".into()))),
            vec![
                Op::Constant(Cell::Address(dest)),
                Op::Constant(Cell::Long(100)),
            ],
        );
        let result = execute_query(&store, &state, &params, addr, 0, &op).unwrap();
        assert!(matches!(result.result, ExecResult::Value(Cell::Bool(true))));
        // The query's own transfer never touched the real `state`.
        assert!(state.get_account(&store, &dest).unwrap().is_none());
    }

    #[test]
    fn transfer_invoke_moves_balance() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let dest = Address::from_bytes(&[9u8; 32]).unwrap();
        let params = ConsensusParams::default();
        // Balance must exceed `max_juice` or the juice reservation consumes
        // the whole account, leaving nothing to transfer mid-transaction.
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(params.max_juice as i64 + 1_000))
            .unwrap();
        let op = Op::Invoke(
            Box::new(Op::Constant(Cell::Keyword("transfer".into()))),
            vec![
                Op::Constant(Cell::Address(dest)),
                Op::Constant(Cell::Long(100)),
            ],
        );
        let (final_state, tx_result) =
            apply_transaction(&store, &state, &params, addr, 1, 0, &op).unwrap();
        assert!(matches!(tx_result.result, ExecResult::Value(Cell::Bool(true))));
        assert_eq!(
            final_state
                .get_account(&store, &dest)
                .unwrap()
                .unwrap()
                .balance,
            100
        );
    }

    #[test]
    fn apply_block_drains_due_scheduled_calls_before_transactions() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let dest = Address::from_bytes(&[9u8; 32]).unwrap();
        let params = ConsensusParams::default();
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(params.max_juice as i64 + 1_000))
            .unwrap();
        let state = state.schedule_call(crate::state::ScheduledCall {
            timestamp: 5,
            target: addr,
            form: Op::Invoke(
                Box::new(Op::Constant(Cell::Keyword("transfer".into()))),
                vec![
                    Op::Constant(Cell::Address(dest)),
                    Op::Constant(Cell::Long(50)),
                ],
            ),
        });
        let (state, block_result) = apply_block(&store, &state, &params, 10, &[]).unwrap();
        assert_eq!(block_result.transaction_results.len(), 1);
        assert!(block_result.transaction_results[0].result.clone().into_value().is_ok());
        assert_eq!(
            state.get_account(&store, &dest).unwrap().unwrap().balance,
            50
        );
    }

    #[test]
    fn apply_block_leaves_not_yet_due_calls_scheduled() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let params = ConsensusParams::default();
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(params.max_juice as i64 + 1_000))
            .unwrap();
        let state = state.schedule_call(crate::state::ScheduledCall {
            timestamp: 100,
            target: addr,
            form: Op::Constant(Cell::Nil),
        });
        let (state, block_result) = apply_block(&store, &state, &params, 10, &[]).unwrap();
        assert!(block_result.transaction_results.is_empty());
        let (_, due) = state.drain_due(100);
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn arithmetic_primitive_adds_operands() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        let op = Op::Invoke(
            Box::new(Op::Constant(Cell::Keyword("+".into()))),
            vec![Op::Constant(Cell::Long(1)), Op::Constant(Cell::Long(2))],
        );
        let (_, tx_result) = apply_transaction(&store, &state, &params, addr, 1, 0, &op).unwrap();
        match tx_result.result {
            ExecResult::Value(Cell::Long(3)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn comparison_primitive_orders_operands() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        let op = Op::Invoke(
            Box::new(Op::Constant(Cell::Keyword("<".into()))),
            vec![Op::Constant(Cell::Long(1)), Op::Constant(Cell::Long(2))],
        );
        let (_, tx_result) = apply_transaction(&store, &state, &params, addr, 1, 0, &op).unwrap();
        match tx_result.result {
            ExecResult::Value(Cell::Bool(true)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn state_special_symbol_reports_current_world_state() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        let (_, tx_result) = apply_transaction(
            &store,
            &state,
            &params,
            addr,
            1,
            0,
            &Op::Lookup("*state*".into()),
        )
        .unwrap();
        match tx_result.result {
            ExecResult::Value(Cell::Map(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn lambda_closure_defines_and_invokes() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        let op = Op::Do(vec![
            Op::Def(
                "make_adder".into(),
                Box::new(Op::Lambda(
                    vec!["x".into(), "y".into()],
                    vec![Op::Invoke(
                        Box::new(Op::Constant(Cell::Keyword("+".into()))),
                        vec![Op::Local(0), Op::Local(1)],
                    )],
                )),
            ),
            Op::Invoke(
                Box::new(Op::Lookup("make_adder".into())),
                vec![Op::Constant(Cell::Long(3)), Op::Constant(Cell::Long(4))],
            ),
        ]);
        let (_, tx_result) = apply_transaction(&store, &state, &params, addr, 1, 0, &op).unwrap();
        match tx_result.result {
            ExecResult::Value(Cell::Long(7)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn recur_loops_a_closure_to_a_new_set_of_arguments() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        // (n acc) -> if n == 0 then acc else recur(n - 1, acc + n)
        let body = Op::Cond(
            Box::new(Op::Invoke(
                Box::new(Op::Constant(Cell::Keyword("=".into()))),
                vec![Op::Local(0), Op::Constant(Cell::Long(0))],
            )),
            Box::new(Op::Local(1)),
            Box::new(Op::Special(
                "recur".into(),
                vec![
                    Op::Invoke(
                        Box::new(Op::Constant(Cell::Keyword("-".into()))),
                        vec![Op::Local(0), Op::Constant(Cell::Long(1))],
                    ),
                    Op::Invoke(
                        Box::new(Op::Constant(Cell::Keyword("+".into()))),
                        vec![Op::Local(1), Op::Local(0)],
                    ),
                ],
            )),
        );
        let lambda = Op::Lambda(vec!["n".into(), "acc".into()], vec![body]);
        let op = Op::Invoke(
            Box::new(lambda),
            vec![Op::Constant(Cell::Long(3)), Op::Constant(Cell::Long(0))],
        );
        let (_, tx_result) = apply_transaction(&store, &state, &params, addr, 1, 0, &op).unwrap();
        match tx_result.result {
            ExecResult::Value(Cell::Long(6)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn halt_stops_evaluation_of_the_rest_of_a_do_block() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        let op = Op::Do(vec![
            Op::Special("halt".into(), vec![]),
            Op::Constant(Cell::Long(99)),
        ]);
        let (_, tx_result) = apply_transaction(&store, &state, &params, addr, 1, 0, &op).unwrap();
        assert!(matches!(tx_result.result, ExecResult::Halt));
    }

    #[test]
    fn return_short_circuits_a_do_block() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        let op = Op::Do(vec![
            Op::Special("return".into(), vec![Op::Constant(Cell::Long(42))]),
            Op::Constant(Cell::Long(99)),
        ]);
        let (_, tx_result) = apply_transaction(&store, &state, &params, addr, 1, 0, &op).unwrap();
        match tx_result.result {
            ExecResult::Return(Cell::Long(42)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn tailcall_inside_a_closure_jumps_to_another_primitive() {
        let store = NullStore;
        let kp = KeyPair::generate().unwrap();
        let addr = addr_from_key(&kp);
        let state = WorldState::empty()
            .set_account(&store, addr, Account::new(1_000_000))
            .unwrap();
        let params = ConsensusParams::default();
        let lambda = Op::Lambda(
            vec!["x".into(), "y".into()],
            vec![Op::Special(
                "tailcall".into(),
                vec![
                    Op::Constant(Cell::Keyword("+".into())),
                    Op::Local(0),
                    Op::Local(1),
                ],
            )],
        );
        let op = Op::Invoke(
            Box::new(lambda),
            vec![Op::Constant(Cell::Long(5)), Op::Constant(Cell::Long(6))],
        );
        let (_, tx_result) = apply_transaction(&store, &state, &params, addr, 1, 0, &op).unwrap();
        match tx_result.result {
            ExecResult::Value(Cell::Long(11)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
