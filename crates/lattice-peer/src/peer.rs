//! The Peer state machine (§4.7): key-pair, latest signed Belief, the
//! vector of States from genesis through the latest consensus-applied
//! block, the aligned vector of BlockResults, and the last observed
//! timestamp. Immutable-value style throughout: every operation returns a
//! new `Peer`.

use std::sync::Arc;

use lattice_consensus::{merge, Belief, Block, ConsensusState, MergeContext, Order};
use lattice_crypto::{KeyPair, Signature};
use lattice_data::{Cell, CanonicalEncode, Ref, Unverified};
use lattice_storage::{CellSink, NoveltySink};
use lattice_types::{AccountKey, Address, ConsensusParams, DataError, Hash, LatticeError, VmErrorKind};
use lattice_vm::{
    apply_block, apply_transaction, execute_query, BlockResult, Op, Transaction, TransactionResult,
    WorldState,
};

use crate::root::PeerRoot;

/// Our own belief entry, or a fresh empty-Order placeholder if somehow
/// absent. Every constructor and mutator inserts our own entry, so the
/// fallback is unreachable in practice — but it keeps this module free of
/// `unwrap`/`expect` on that invariant.
fn own_entry(belief: &Belief, our_key: AccountKey) -> Unverified<Order> {
    belief
        .get(&our_key)
        .cloned()
        .unwrap_or_else(|| Unverified::new(our_key, Signature([0u8; 64]), Order::empty(our_key)))
}

/// One running peer (§3, §4.7). `states[0]` is the genesis state;
/// `states[i+1]` is the result of applying `block_results[i]`'s block.
/// `state_timestamps` runs alongside `states`, recording each state's
/// producing block's timestamp (0 for genesis).
#[derive(Clone)]
pub struct Peer {
    key_pair: Arc<KeyPair>,
    our_key: AccountKey,
    belief: Belief,
    consensus_state: ConsensusState,
    params: ConsensusParams,
    store: Arc<dyn CellSink>,
    states: Vec<WorldState>,
    state_timestamps: Vec<i64>,
    block_results: Vec<BlockResult>,
    last_timestamp: i64,
    persisted_states: usize,
    persisted_belief_hash: Option<Hash>,
}

impl Peer {
    /// `create(key-pair, genesis-state)` (§4.7): Belief has a single Order
    /// for our key with zero blocks.
    pub fn create(
        key_pair: KeyPair,
        genesis_state: WorldState,
        consensus_state: ConsensusState,
        params: ConsensusParams,
        store: Arc<dyn CellSink>,
    ) -> Result<Self, LatticeError> {
        let our_key = AccountKey::from_bytes(key_pair.public_key().as_bytes())
            .ok_or_else(|| DataError::MalformedEncoding("bad public key length".into()))?;
        let order = Order::empty(our_key);
        let signature = key_pair
            .sign(&order.encode())
            .map_err(|_| LatticeError::OwnSignatureInvalid)?;
        let mut belief = Belief::empty();
        belief.insert(our_key, Unverified::new(our_key, signature, order));
        Ok(Peer {
            key_pair: Arc::new(key_pair),
            our_key,
            belief,
            consensus_state,
            params,
            store,
            states: vec![genesis_state],
            state_timestamps: vec![0],
            block_results: Vec::new(),
            last_timestamp: 0,
            persisted_states: 0,
            persisted_belief_hash: None,
        })
    }

    /// The second `create` constructor (§4.7, §9 Open Question): bootstraps
    /// from a remote Belief, trust-on-first-use. Every entry is verified
    /// (signature + registered stake) exactly as merge's incorporation step
    /// would; our own Order still starts empty.
    pub fn create_from_remote_belief(
        key_pair: KeyPair,
        genesis_state: WorldState,
        consensus_state: ConsensusState,
        params: ConsensusParams,
        store: Arc<dyn CellSink>,
        remote_belief: &Belief,
    ) -> Result<Self, LatticeError> {
        let mut peer = Self::create(key_pair, genesis_state, consensus_state, params, store)?;
        let mut belief = Belief::empty();
        belief.insert(peer.our_key, own_entry(&peer.belief, peer.our_key));
        for (account_key, unverified) in remote_belief.iter() {
            if *account_key == peer.our_key {
                continue;
            }
            if unverified.verify().is_err() {
                tracing::warn!(peer = %account_key, "dropping bootstrap belief entry: signature does not verify");
                continue;
            }
            if !peer.consensus_state.is_registered(account_key) {
                tracing::warn!(peer = %account_key, "dropping bootstrap belief entry: not a registered staked peer");
                continue;
            }
            belief.insert(*account_key, unverified.clone());
        }
        peer.belief = belief;
        Ok(peer)
    }

    pub fn our_key(&self) -> AccountKey {
        self.our_key
    }

    pub fn belief(&self) -> &Belief {
        &self.belief
    }

    pub fn latest_state(&self) -> &WorldState {
        &self.states[self.states.len() - 1]
    }

    pub fn block_results(&self) -> &[BlockResult] {
        &self.block_results
    }

    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    /// `propose-block(block) -> Peer` (§4.7): inserts `block` at the
    /// proposal-point of our own Order.
    pub fn propose_block(&self, block: Block) -> Result<Self, LatticeError> {
        let our_order = own_entry(&self.belief, self.our_key).payload().clone();
        let new_order = our_order.propose(block);
        let signature = self
            .key_pair
            .sign(&new_order.encode())
            .map_err(|_| LatticeError::OwnSignatureInvalid)?;
        let mut belief = self.belief.clone();
        belief.insert(self.our_key, Unverified::new(self.our_key, signature, new_order));
        let mut next = self.clone();
        next.belief = belief;
        Ok(next)
    }

    /// `merge-beliefs(beliefs…) -> Peer` (§4.7): runs §4.6, then applies
    /// every newly finalized block to the tail State via the VM, appending
    /// `(state, block-result)` pairs.
    pub fn merge_beliefs(&self, remote_beliefs: &[Belief]) -> Result<Self, LatticeError> {
        let ctx = MergeContext {
            our_key: self.our_key,
            consensus_state: &self.consensus_state,
        };
        let new_belief = merge(&self.key_pair, &self.belief, remote_beliefs, &ctx)?;
        let our_entry = own_entry(&new_belief, self.our_key);
        let our_order = our_entry.payload();

        let applied = (self.states.len() - 1) as u64;
        let target = our_order.consensus_point();

        let mut states = self.states.clone();
        let mut state_timestamps = self.state_timestamps.clone();
        let mut block_results = self.block_results.clone();

        for index in applied..target {
            let block = match our_order.block_at(index) {
                Some(block) => block,
                None => {
                    tracing::error!(
                        index,
                        proposal_point = our_order.proposal_point(),
                        "consensus point advanced past our own block count; stopping replay"
                    );
                    break;
                }
            };
            let transactions: Vec<(Address, u64, Op)> = block
                .transactions
                .iter()
                .map(|tx| (tx.signer, tx.sequence, tx.op.clone()))
                .collect();
            let tail = &states[states.len() - 1];
            let (next_state, result) = apply_block(
                self.store.as_ref(),
                tail,
                &self.params,
                block.timestamp,
                &transactions,
            )
            .map_err(|e| DataError::MalformedEncoding(e.to_string()))?;
            states.push(next_state);
            state_timestamps.push(block.timestamp);
            block_results.push(result);
        }

        let mut next = self.clone();
        next.belief = new_belief;
        next.states = states;
        next.state_timestamps = state_timestamps;
        next.block_results = block_results;
        Ok(next)
    }

    /// `execute-query(form, address) -> Context` (§4.7): read-only, runs on
    /// the latest consensus State.
    pub fn execute_query(&self, form: &Op, address: Address) -> Result<TransactionResult, VmErrorKind> {
        execute_query(
            self.store.as_ref(),
            self.latest_state(),
            &self.params,
            address,
            self.last_timestamp,
            form,
        )
    }

    /// `estimate-cost(transaction) -> long` (§4.7): dry-runs on the latest
    /// consensus State, returning `balance-before - balance-after`.
    pub fn estimate_cost(&self, transaction: &Transaction) -> Result<i64, VmErrorKind> {
        let state = self.latest_state();
        let before = state
            .get_account(self.store.as_ref(), &transaction.signer)
            .map_err(|e| VmErrorKind::State(e.to_string()))?
            .ok_or(VmErrorKind::Nobody)?;
        let (after_state, _) = apply_transaction(
            self.store.as_ref(),
            state,
            &self.params,
            transaction.signer,
            transaction.sequence,
            self.last_timestamp,
            &transaction.op,
        )?;
        let after = after_state
            .get_account(self.store.as_ref(), &transaction.signer)
            .map_err(|e| VmErrorKind::State(e.to_string()))?
            .ok_or(VmErrorKind::Nobody)?;
        Ok(before.balance - after.balance)
    }

    /// `update-timestamp(t) -> Peer` (§4.7): monotone; `t` below the
    /// current timestamp is silently ignored.
    pub fn update_timestamp(&self, t: i64) -> Self {
        if t < self.last_timestamp {
            return self.clone();
        }
        let mut next = self.clone();
        next.last_timestamp = t;
        next
    }

    /// `as-of(timestamp) -> State?` (§4.7): the state whose timestamp is
    /// the greatest at or below `timestamp`.
    pub fn as_of(&self, timestamp: i64) -> Option<&WorldState> {
        let idx = self.state_timestamps.partition_point(|&ts| ts <= timestamp);
        if idx == 0 {
            None
        } else {
            Some(&self.states[idx - 1])
        }
    }

    /// `as-of-range(start, interval, count) -> vector of states` (§4.7):
    /// `count` states at `start, start+interval, …`; duplicates allowed.
    pub fn as_of_range(&self, start: i64, interval: i64, count: usize) -> Vec<Option<WorldState>> {
        (0..count)
            .map(|i| self.as_of(start + interval * i as i64).cloned())
            .collect()
    }

    fn to_root(&self) -> PeerRoot {
        PeerRoot {
            our_key: self.our_key,
            belief: self
                .belief
                .iter()
                .map(|(peer, unverified)| {
                    (*peer, unverified.signature().clone(), unverified.payload().hash())
                })
                .collect(),
            state_hashes: self.states.iter().map(|s| s.to_cell().hash()).collect(),
            state_timestamps: self.state_timestamps.clone(),
            last_timestamp: self.last_timestamp,
        }
    }

    /// The hash under which [`Self::persist_state`] stores (and
    /// [`Self::restore`] looks up) this peer's root record. Pure function of
    /// content, not of what has actually been written to the store.
    pub fn root_hash(&self) -> Hash {
        self.to_root().hash()
    }

    /// `persist-state(novelty-handler) -> Peer` (§4.7): materializes
    /// Belief, States and the root record into the store; emits novelty for
    /// anything not previously persisted.
    pub fn persist_state(&self, novelty: &dyn NoveltySink) -> Result<Self, LatticeError> {
        for state in &self.states[self.persisted_states..] {
            let cell = state.to_cell();
            let hash = cell.hash();
            self.store
                .store_bytes(&hash, &cell.encode())
                .map_err(LatticeError::Data)?;
            novelty.notify(&Ref::new(cell).to_persisted());
        }

        for (_, unverified) in self.belief.iter() {
            let order = unverified.payload();
            self.store
                .store_bytes(&order.hash(), &order.encode())
                .map_err(LatticeError::Data)?;
        }

        let our_entry = own_entry(&self.belief, self.our_key);
        let signed_cell = Cell::SignedData {
            signer: self.our_key,
            signature: *our_entry.signature().as_bytes(),
            payload: Arc::new(Cell::Blob(our_entry.payload().encode())),
        };
        let signed_hash = signed_cell.hash();
        let mut persisted_belief_hash = self.persisted_belief_hash;
        if persisted_belief_hash != Some(signed_hash) {
            self.store
                .store_bytes(&signed_hash, &signed_cell.encode())
                .map_err(LatticeError::Data)?;
            novelty.notify(&Ref::new(signed_cell).to_announced());
            persisted_belief_hash = Some(signed_hash);
        }

        let root = self.to_root();
        self.store
            .store_bytes(&root.hash(), &root.encode())
            .map_err(LatticeError::Data)?;

        let mut next = self.clone();
        next.persisted_states = self.states.len();
        next.persisted_belief_hash = persisted_belief_hash;
        Ok(next)
    }

    /// `restore(store, root-hash, key-pair) -> Peer?` (§4.7): reconstructs
    /// a Peer from a persisted root; `None` if the hash is not in the
    /// store. `BlockResult`s are not reconstructed — they are an execution
    /// log, not needed to continue consensus from the restored lineage.
    pub fn restore(
        store: Arc<dyn CellSink>,
        root_hash: Hash,
        key_pair: KeyPair,
        consensus_state: ConsensusState,
        params: ConsensusParams,
    ) -> Result<Option<Self>, LatticeError> {
        let root_bytes = match store.get(&root_hash).map_err(LatticeError::Data)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let root = PeerRoot::decode(&root_bytes).map_err(LatticeError::Data)?;

        let our_key = AccountKey::from_bytes(key_pair.public_key().as_bytes())
            .ok_or_else(|| DataError::MalformedEncoding("bad public key length".into()))?;
        if our_key != root.our_key {
            return Err(LatticeError::Data(DataError::MalformedEncoding(
                "key pair does not match the restored peer's key".into(),
            )));
        }

        let mut belief = Belief::empty();
        for (peer, signature, order_hash) in &root.belief {
            let order_bytes = store
                .get(order_hash)
                .map_err(LatticeError::Data)?
                .ok_or_else(|| DataError::NotFound(order_hash.to_string()))?;
            let order = Order::decode(&order_bytes).map_err(LatticeError::Data)?;
            belief.insert(*peer, Unverified::new(*peer, signature.clone(), order));
        }

        let mut states = Vec::with_capacity(root.state_hashes.len());
        for hash in &root.state_hashes {
            let bytes = store
                .get(hash)
                .map_err(LatticeError::Data)?
                .ok_or_else(|| DataError::NotFound(hash.to_string()))?;
            let cell = Cell::decode(&bytes).map_err(LatticeError::Data)?;
            states.push(WorldState::from_cell(&cell, store.as_ref()).map_err(LatticeError::Data)?);
        }

        let our_entry = own_entry(&belief, our_key);
        let signed_cell = Cell::SignedData {
            signer: our_key,
            signature: *our_entry.signature().as_bytes(),
            payload: Arc::new(Cell::Blob(our_entry.payload().encode())),
        };

        Ok(Some(Peer {
            key_pair: Arc::new(key_pair),
            our_key,
            belief,
            consensus_state,
            params,
            store,
            states,
            state_timestamps: root.state_timestamps,
            block_results: Vec::new(),
            last_timestamp: root.last_timestamp,
            persisted_states: root.state_hashes.len(),
            persisted_belief_hash: Some(signed_cell.hash()),
        }))
    }
}
