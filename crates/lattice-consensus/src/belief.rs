//! A Belief (§4.6): the map from peer key to that peer's signed Order, the
//! unit of gossip the merge protocol consumes and produces.

use std::collections::BTreeMap;

use lattice_data::Unverified;
use lattice_types::AccountKey;

use crate::order::Order;

/// A peer's view of every peer's (signed, not yet verified by us) Order.
#[derive(Clone, Debug, Default)]
pub struct Belief {
    entries: BTreeMap<AccountKey, Unverified<Order>>,
}

impl Belief {
    pub fn empty() -> Self {
        Belief {
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, peer: AccountKey, order: Unverified<Order>) {
        self.entries.insert(peer, order);
    }

    pub fn get(&self, peer: &AccountKey) -> Option<&Unverified<Order>> {
        self.entries.get(peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountKey, &Unverified<Order>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn from_map(entries: BTreeMap<AccountKey, Unverified<Order>>) -> Self {
        Belief { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_crypto::KeyPair;
    use lattice_data::CanonicalEncode;

    #[test]
    fn insert_then_get_round_trips() {
        let kp = KeyPair::generate().unwrap();
        let peer = AccountKey::from_bytes(kp.public_key().as_bytes()).unwrap();
        let order = Order::empty(peer);
        let sig = kp.sign(&order.encode()).unwrap();
        let mut belief = Belief::empty();
        belief.insert(peer, Unverified::new(peer, sig, order.clone()));
        assert_eq!(belief.get(&peer).unwrap().payload(), &order);
    }
}
