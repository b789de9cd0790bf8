//! The merge function (§4.6): the heart of the protocol. Combines our
//! local Belief with zero or more remote Beliefs into a new local Belief,
//! possibly advancing our own Order's consensus-point.
//!
//! Grounded on the six numbered steps of §4.6: Incorporation,
//! Self-preservation, Convergent proposal, Propose-what-others-propose,
//! Consensus-point advance, Sign.

use std::collections::BTreeMap;

use lattice_crypto::{KeyPair, Signature};
use lattice_data::{CanonicalEncode, Unverified};
use lattice_types::{AccountKey, ConsensusProtocolError, Hash, LatticeError};

use crate::belief::Belief;
use crate::block::Block;
use crate::order::Order;
use crate::state::ConsensusState;

/// Parameters the merge needs beyond the Beliefs themselves.
pub struct MergeContext<'a> {
    pub our_key: AccountKey,
    pub consensus_state: &'a ConsensusState,
}

/// Per-index stake tally: block hash -> (agreeing stake, one witness block).
fn tally_at(
    candidates: &BTreeMap<AccountKey, Unverified<Order>>,
    index: u64,
    consensus_state: &ConsensusState,
) -> BTreeMap<Hash, (u128, Block)> {
    let mut tally: BTreeMap<Hash, (u128, Block)> = BTreeMap::new();
    for (peer, unverified) in candidates {
        if let Some(block) = unverified.payload().block_at(index) {
            let stake = consensus_state.stake_of(peer);
            let entry = tally
                .entry(block.hash())
                .or_insert_with(|| (0, block.clone()));
            entry.0 += stake;
        }
    }
    tally
}

fn leading(tally: &BTreeMap<Hash, (u128, Block)>) -> Option<(u128, Block)> {
    tally
        .values()
        .max_by_key(|(stake, _)| *stake)
        .map(|(stake, block)| (*stake, block.clone()))
}

/// Step 1 + 2: verifies every candidate signature and stake registration,
/// keeps the highest-proposal-point Order per peer, then forces our own
/// entry to come from `local_belief` regardless of what any remote claims.
fn incorporate(
    local_belief: &Belief,
    remote_beliefs: &[Belief],
    ctx: &MergeContext,
) -> BTreeMap<AccountKey, Unverified<Order>> {
    let mut candidates: BTreeMap<AccountKey, Unverified<Order>> = BTreeMap::new();

    for belief in std::iter::once(local_belief).chain(remote_beliefs) {
        for (peer, unverified) in belief.iter() {
            if unverified.verify().is_err() {
                tracing::warn!(peer = %peer, "dropping belief entry: signature does not verify");
                continue;
            }
            if !ctx.consensus_state.is_registered(peer) {
                tracing::warn!(peer = %peer, "dropping belief entry: not a registered staked peer");
                continue;
            }
            let candidate_proposal_point = unverified.payload().proposal_point();
            let keep = match candidates.get(peer) {
                Some(existing) => existing.payload().proposal_point() < candidate_proposal_point,
                None => true,
            };
            if keep {
                candidates.insert(*peer, unverified.clone());
            }
        }
    }

    if let Some(our_entry) = local_belief.get(&ctx.our_key) {
        candidates.insert(ctx.our_key, our_entry.clone());
    }

    candidates
}

/// Runs the full merge protocol, returning the new local Belief. Fails
/// only if re-signing our updated Order fails (a local key/crypto error,
/// not a protocol disagreement).
pub fn merge(
    our_key_pair: &KeyPair,
    local_belief: &Belief,
    remote_beliefs: &[Belief],
    ctx: &MergeContext,
) -> Result<Belief, LatticeError> {
    let mut candidates = incorporate(local_belief, remote_beliefs, ctx);

    let our_order = candidates
        .get(&ctx.our_key)
        .map(|u| u.payload().clone())
        .unwrap_or_else(|| Order::empty(ctx.our_key));
    let consensus_point = our_order.consensus_point();
    let total_stake = ctx.consensus_state.total_stake();

    // Step 3 + 4: propose-what-others-propose, at the >=1/2 plurality
    // threshold, starting just past our confirmed consensus point.
    let proposal_threshold = lattice_types::ConsensusParams::proposal_threshold(total_stake);
    let mut proposed = Vec::new();
    let mut i = consensus_point;
    loop {
        let tally = tally_at(&candidates, i, ctx.consensus_state);
        match leading(&tally) {
            Some((stake, block)) if stake >= proposal_threshold => {
                proposed.push(block);
                i += 1;
            }
            _ => break,
        }
    }

    let updated_order = if proposed.is_empty() {
        our_order.clone()
    } else {
        our_order.rewrite_from(consensus_point, proposed)
    };

    // Placeholder signature: only `updated_order`'s block hashes matter
    // for the consensus-point tally below; the real signature is attached
    // once the final consensus point is known.
    candidates.insert(
        ctx.our_key,
        Unverified::new(ctx.our_key, Signature([0u8; 64]), updated_order.clone()),
    );

    // Step 5: consensus-point advance, at the strict >2/3 supermajority
    // threshold, over the (now self-aligned) candidate set.
    let consensus_threshold = lattice_types::ConsensusParams::consensus_threshold(total_stake);
    let mut advanced = 0u64;
    let mut i = consensus_point;
    loop {
        let tally = tally_at(&candidates, i, ctx.consensus_state);
        match leading(&tally) {
            Some((stake, _)) if stake > consensus_threshold => {
                advanced += 1;
                i += 1;
            }
            _ => break,
        }
    }
    let computed_consensus_point = consensus_point + advanced;

    let final_consensus_point = if computed_consensus_point < consensus_point {
        tracing::error!(
            current = consensus_point,
            computed = computed_consensus_point,
            "merge computed a receding consensus point; retaining current"
        );
        consensus_point
    } else {
        computed_consensus_point
    };

    let final_order = match updated_order.update_consensus_point(final_consensus_point) {
        Ok(order) => order,
        Err(ConsensusProtocolError::ConsensusAheadOfProposal { .. }) => {
            tracing::error!(
                "computed consensus point {final_consensus_point} exceeds our own proposal point {}; clamping",
                updated_order.proposal_point()
            );
            updated_order
                .update_consensus_point(updated_order.proposal_point())
                .unwrap_or(updated_order)
        }
        Err(other) => return Err(LatticeError::Protocol(other)),
    };

    let signature = our_key_pair
        .sign(&final_order.encode())
        .map_err(|_| LatticeError::OwnSignatureInvalid)?;
    candidates.insert(
        ctx.our_key,
        Unverified::new(ctx.our_key, signature, final_order),
    );

    Ok(Belief::from_map(candidates))
}
