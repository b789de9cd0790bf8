//! Integration tests for the `Peer` state machine, covering its concrete
//! operational scenarios end to end: queries, block proposal, belief
//! merging and convergence, bad-signature rejection, `as-of` lookups, and
//! deterministic replay from persisted state.

use std::sync::Arc;

use lattice_consensus::{Belief, Block, ConsensusState, Order};
use lattice_crypto::KeyPair;
use lattice_data::{CanonicalEncode, Cell, Unverified};
use lattice_peer::Peer;
use lattice_storage::novelty::NoOpSink;
use lattice_storage::{CellSink, MemoryStore};
use lattice_types::{AccountKey, Address, ConsensusParams, VmErrorKind};
use lattice_vm::{Account, ExecResult, Op, Transaction, WorldState};

fn keypair() -> (KeyPair, AccountKey, Address) {
    let kp = KeyPair::generate().expect("keygen");
    let account_key = AccountKey::from_bytes(kp.public_key().as_bytes()).expect("key length");
    let address = Address::from_bytes(kp.public_key().as_bytes()).expect("key length");
    (kp, account_key, address)
}

fn store() -> Arc<dyn CellSink> {
    Arc::new(MemoryStore::new())
}

/// S1: a basic read-only query against a funded account returns its value
/// without mutating state.
#[test]
fn execute_query_returns_value_without_mutating_state() {
    let (kp, account_key, address) = keypair();
    let store = store();
    let genesis = WorldState::empty()
        .set_account(store.as_ref(), address, Account::new(1_000_000))
        .expect("set account");
    let peer = Peer::create(
        kp,
        genesis,
        ConsensusState::empty().with_stake(account_key, 100),
        ConsensusParams::default(),
        store,
    )
    .expect("create peer");

    let query = Op::Invoke(
        Box::new(Op::Constant(Cell::Keyword("+".into()))),
        vec![Op::Constant(Cell::Long(1)), Op::Constant(Cell::Long(2))],
    );
    let result = peer.execute_query(&query, address).expect("query succeeds");
    match result.result {
        ExecResult::Value(Cell::Long(3)) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}

/// S2: querying an undeclared symbol surfaces `VmErrorKind::Undeclared`
/// naming the symbol.
#[test]
fn execute_query_on_undeclared_symbol_reports_its_name() {
    let (kp, account_key, address) = keypair();
    let store = store();
    let genesis = WorldState::empty()
        .set_account(store.as_ref(), address, Account::new(1_000_000))
        .expect("set account");
    let peer = Peer::create(
        kp,
        genesis,
        ConsensusState::empty().with_stake(account_key, 100),
        ConsensusParams::default(),
        store,
    )
    .expect("create peer");

    let result = peer
        .execute_query(&Op::Lookup("bad".into()), address)
        .expect("query runs, even though the form itself errors");
    match result.result {
        ExecResult::Error(VmErrorKind::Undeclared(symbol), message) => {
            assert_eq!(symbol, "bad");
            assert!(message.contains("bad"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

/// S3: proposing one block advances our own Order's proposal-point to 1
/// while leaving its consensus-point at 0 (nothing has been confirmed by
/// any other peer yet).
#[test]
fn propose_block_advances_proposal_point_only() {
    let (kp, account_key, address) = keypair();
    let store = store();
    let genesis = WorldState::empty()
        .set_account(store.as_ref(), address, Account::new(1_000_000))
        .expect("set account");
    let peer = Peer::create(
        kp,
        genesis,
        ConsensusState::empty().with_stake(account_key, 100),
        ConsensusParams::default(),
        store,
    )
    .expect("create peer");

    let block = Block::new(account_key, 1, Vec::<Transaction>::new());
    let peer = peer.propose_block(block).expect("propose");

    let our_order = peer.belief().get(&account_key).expect("our entry").payload();
    assert_eq!(our_order.proposal_point(), 1);
    assert_eq!(our_order.consensus_point(), 0);
}

/// S4: two peers at equal stake, each proposing the same block, converge
/// on a confirmed consensus-point after exchanging beliefs; a further
/// block proposed by just one of them is picked up and confirmed by the
/// other after one more exchange.
///
/// The merge algorithm tallies stake per index on every merge call (§4.6
/// steps 3-5), so full agreement already clears both the plurality and
/// supermajority thresholds in a single round: consensus-point becomes 1
/// (one block confirmed) rather than 0, matching the count-based
/// proposal-point/consensus-point convention this `Order` implements (see
/// `Order::propose`, and the `three_peers_agreeing_advance_consensus_point`
/// merge unit test).
#[test]
fn two_equal_stake_peers_converge_across_merges() {
    let (kp_a, a, addr_a) = keypair();
    let (kp_b, b, addr_b) = keypair();
    let consensus_state = ConsensusState::empty().with_stake(a, 100).with_stake(b, 100);
    let params = ConsensusParams::default();

    let store_a = store();
    let genesis_a = WorldState::empty()
        .set_account(store_a.as_ref(), addr_a, Account::new(1_000_000))
        .expect("set account");
    let peer_a = Peer::create(kp_a, genesis_a, consensus_state.clone(), params, store_a)
        .expect("create peer a");

    let store_b = store();
    let genesis_b = WorldState::empty()
        .set_account(store_b.as_ref(), addr_b, Account::new(1_000_000))
        .expect("set account");
    let peer_b = Peer::create(kp_b, genesis_b, consensus_state.clone(), params, store_b)
        .expect("create peer b");

    let shared_block = Block::new(a, 1, Vec::<Transaction>::new());
    let peer_a = peer_a.propose_block(shared_block.clone()).expect("a proposes x");
    let peer_b = peer_b.propose_block(shared_block).expect("b proposes x");

    let peer_a = peer_a
        .merge_beliefs(&[peer_b.belief().clone()])
        .expect("a merges b");
    let peer_b = peer_b
        .merge_beliefs(&[peer_a.belief().clone()])
        .expect("b merges a");

    assert_eq!(
        peer_a.belief().get(&a).expect("a's entry").payload().consensus_point(),
        1
    );
    assert_eq!(
        peer_b.belief().get(&b).expect("b's entry").payload().consensus_point(),
        1
    );

    // Only A proposes the next block.
    let next_block = Block::new(a, 2, Vec::<Transaction>::new());
    let peer_a = peer_a.propose_block(next_block).expect("a proposes y");

    let peer_b = peer_b
        .merge_beliefs(&[peer_a.belief().clone()])
        .expect("b merges a's new proposal");
    let peer_a = peer_a
        .merge_beliefs(&[peer_b.belief().clone()])
        .expect("a merges b's now-aligned belief");

    assert_eq!(
        peer_a.belief().get(&a).expect("a's entry").payload().consensus_point(),
        2
    );
    assert_eq!(
        peer_b.belief().get(&b).expect("b's entry").payload().consensus_point(),
        2
    );
}

/// S5: a belief entry whose signature does not verify is dropped during
/// merge rather than propagated; our own Order is unaffected by it.
#[test]
fn merge_drops_badly_signed_belief_entries() {
    let (kp_a, a, addr_a) = keypair();
    let (kp_b, b, _addr_b) = keypair();
    let consensus_state = ConsensusState::empty().with_stake(a, 100).with_stake(b, 100);
    let params = ConsensusParams::default();

    let store_a = store();
    let genesis_a = WorldState::empty()
        .set_account(store_a.as_ref(), addr_a, Account::new(1_000_000))
        .expect("set account");
    let peer_a = Peer::create(kp_a, genesis_a, consensus_state, params, store_a)
        .expect("create peer a");

    // A well-formed Order for B, but signed over different bytes than it
    // actually carries: `verify()` will reject it.
    let bogus_order = Order::empty(b).propose(Block::new(b, 1, Vec::new()));
    let unrelated_signature = kp_b.sign(b"not the order bytes").expect("sign");
    let mut bad_belief = Belief::empty();
    bad_belief.insert(b, Unverified::new(b, unrelated_signature, bogus_order));

    let peer_a = peer_a
        .merge_beliefs(&[bad_belief])
        .expect("merge tolerates bad input");

    assert!(peer_a.belief().get(&b).is_none());
    let our_order = peer_a.belief().get(&a).expect("a's own entry").payload();
    assert_eq!(our_order.block_count(), 0);
    assert_eq!(our_order.consensus_point(), 0);
}

/// S6: `as_of` returns the most recent state at or before a timestamp, and
/// `None` for anything before genesis; `as_of_range` samples a regular
/// interval.
#[test]
fn as_of_and_as_of_range_sample_by_timestamp() {
    let (kp, account_key, address) = keypair();
    let store = store();
    let genesis = WorldState::empty()
        .set_account(store.as_ref(), address, Account::new(1_000_000))
        .expect("set account");
    let peer = Peer::create(
        kp,
        genesis,
        ConsensusState::empty().with_stake(account_key, 100),
        ConsensusParams::default(),
        store,
    )
    .expect("create peer");

    assert!(peer.as_of(-1).is_none());
    assert!(peer.as_of(0).is_some());
    assert!(peer.as_of(1_000_000).is_some());

    let samples = peer.as_of_range(0, 60_000, 5);
    assert_eq!(samples.len(), 5);
    assert!(samples.iter().all(Option::is_some));
}

/// S7: replaying the same signed block from genesis on two independently
/// constructed peers yields byte-identical state lineages.
#[test]
fn deterministic_replay_matches_across_peers() {
    let (kp_a, a, addr_a) = keypair();
    let (kp_b, b, addr_b) = keypair();
    let consensus_state = ConsensusState::empty().with_stake(a, 100).with_stake(b, 100);
    let params = ConsensusParams::default();

    let store_a = store();
    let genesis_a = WorldState::empty()
        .set_account(store_a.as_ref(), addr_a, Account::new(1_000_000))
        .expect("set account")
        .set_account(store_a.as_ref(), addr_b, Account::new(1_000_000))
        .expect("set account");
    let peer_a = Peer::create(kp_a, genesis_a, consensus_state.clone(), params, store_a)
        .expect("create peer a");

    let store_b = store();
    let genesis_b = WorldState::empty()
        .set_account(store_b.as_ref(), addr_a, Account::new(1_000_000))
        .expect("set account")
        .set_account(store_b.as_ref(), addr_b, Account::new(1_000_000))
        .expect("set account");
    let peer_b = Peer::create(kp_b, genesis_b, consensus_state.clone(), params, store_b)
        .expect("create peer b");

    let transfer = Op::Invoke(
        Box::new(Op::Constant(Cell::Keyword("transfer".into()))),
        vec![
            Op::Constant(Cell::Address(addr_b)),
            Op::Constant(Cell::Long(10)),
        ],
    );
    let block = Block::new(
        a,
        1,
        vec![Transaction {
            signer: addr_a,
            sequence: 1,
            op: transfer,
        }],
    );

    let peer_a = peer_a.propose_block(block.clone()).expect("a proposes");
    let peer_b = peer_b.propose_block(block).expect("b proposes the same block");

    let peer_a = peer_a
        .merge_beliefs(&[peer_b.belief().clone()])
        .expect("a merges and replays");
    let peer_b = peer_b
        .merge_beliefs(&[peer_a.belief().clone()])
        .expect("b merges and replays");

    assert_eq!(
        peer_a.latest_state().to_cell().hash(),
        peer_b.latest_state().to_cell().hash()
    );
}

/// `persist_state`/`restore` round-trip: a restored peer sees the same
/// latest state and belief consensus-point as the one that persisted it.
#[test]
fn persist_then_restore_recovers_peer_lineage() {
    let (kp, account_key, address) = keypair();
    let restore_kp = kp.clone();
    let store: Arc<dyn CellSink> = Arc::new(MemoryStore::new());
    let genesis = WorldState::empty()
        .set_account(store.as_ref(), address, Account::new(1_000_000))
        .expect("set account");
    let consensus_state = ConsensusState::empty().with_stake(account_key, 100);
    let params = ConsensusParams::default();
    let peer = Peer::create(kp, genesis, consensus_state.clone(), params, Arc::clone(&store))
        .expect("create peer");

    let block = Block::new(account_key, 1, Vec::<Transaction>::new());
    let peer = peer.propose_block(block).expect("propose");
    let peer = peer
        .merge_beliefs(&[])
        .expect("merge with no remote beliefs still re-signs and may advance alone");
    let peer = peer.persist_state(&NoOpSink).expect("persist");

    let root_hash = peer.root_hash();
    let restored = Peer::restore(
        Arc::clone(&store),
        root_hash,
        restore_kp,
        consensus_state,
        params,
    )
    .expect("restore succeeds")
    .expect("root hash was just persisted");

    assert_eq!(
        restored.latest_state().to_cell().hash(),
        peer.latest_state().to_cell().hash()
    );
    assert_eq!(
        restored
            .belief()
            .get(&account_key)
            .expect("restored entry")
            .payload()
            .consensus_point(),
        peer.belief()
            .get(&account_key)
            .expect("entry")
            .payload()
            .consensus_point()
    );
}
