//! The registered-peer stake table the merge protocol checks candidates
//! against (§4.6 step 1: "registered staked peer in the current consensus
//! state").

use std::collections::BTreeMap;

use lattice_types::AccountKey;

/// The stake-weighted set of peers eligible to participate in consensus.
#[derive(Clone, Debug, Default)]
pub struct ConsensusState {
    stakes: BTreeMap<AccountKey, u128>,
}

impl ConsensusState {
    pub fn empty() -> Self {
        ConsensusState {
            stakes: BTreeMap::new(),
        }
    }

    pub fn with_stake(mut self, peer: AccountKey, stake: u128) -> Self {
        self.stakes.insert(peer, stake);
        self
    }

    pub fn is_registered(&self, peer: &AccountKey) -> bool {
        self.stakes.contains_key(peer)
    }

    pub fn stake_of(&self, peer: &AccountKey) -> u128 {
        self.stakes.get(peer).copied().unwrap_or(0)
    }

    pub fn total_stake(&self) -> u128 {
        self.stakes.values().sum()
    }

    pub fn peers(&self) -> impl Iterator<Item = &AccountKey> {
        self.stakes.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_stake_sums_every_registered_peer() {
        let a = AccountKey::from_bytes(&[1u8; 32]).unwrap();
        let b = AccountKey::from_bytes(&[2u8; 32]).unwrap();
        let state = ConsensusState::empty().with_stake(a, 100).with_stake(b, 200);
        assert_eq!(state.total_stake(), 300);
        assert!(state.is_registered(&a));
        assert_eq!(state.stake_of(&b), 200);
    }
}
