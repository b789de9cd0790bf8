//! Persistent Map (§3, §4.2): a HAMT keyed by the hash of the key cell,
//! branching factor 16. Up to 8 entries are held flat (sorted by key hash);
//! beyond that the node explodes into a sparse, nibble-indexed branch.
//!
//! Grounded on `ioi-state::tree::jellyfish::node::Node::Internal`'s sparse
//! `Vec<(u8, NodeHash)>` child list, generalized from account-hash keys to
//! arbitrary hashed `Cell` keys. Canonical ascending-nibble iteration order
//! falls directly out of this shape, giving "iteration order is a pure
//! function of the set of keys" (§4.2) without any extra sorting pass.

use lattice_types::DataError;

use crate::cell::Cell;
use crate::codec::{read_vlc_u64, write_vlc_u64, CanonicalEncode};
use crate::refs::{CellStore, Ref};

/// Entries are held flat up to this count; beyond it, the node explodes
/// into a nibble-indexed branch.
pub const FLAT_THRESHOLD: usize = 8;

#[derive(Clone, Debug)]
enum Repr {
    /// Key/value ref pairs, sorted ascending by key hash.
    Flat(Vec<(Ref, Ref)>),
    /// `(nibble, child)` pairs, sorted ascending by nibble; each child
    /// resolves to a `Cell::Map` one level deeper.
    Branch(Vec<(u8, Ref)>),
}

/// A persistent, structurally-shared map from cells to cells.
#[derive(Clone, Debug)]
pub struct PMap {
    repr: Repr,
    count: usize,
}

fn nibble_at(hash: &lattice_types::Hash, depth: u32) -> u8 {
    let byte = hash.as_bytes()[(depth / 2) as usize];
    if depth % 2 == 0 {
        byte >> 4
    } else {
        byte & 0x0f
    }
}

impl Default for PMap {
    fn default() -> Self {
        PMap::empty()
    }
}

impl PMap {
    pub fn empty() -> Self {
        PMap {
            repr: Repr::Flat(Vec::new()),
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn get(&self, store: &dyn CellStore, key: &Cell) -> Result<Option<Cell>, DataError> {
        Self::get_in(&self.repr, store, key, &key.hash(), 0)
    }

    fn get_in(
        repr: &Repr,
        store: &dyn CellStore,
        key: &Cell,
        key_hash: &lattice_types::Hash,
        depth: u32,
    ) -> Result<Option<Cell>, DataError> {
        match repr {
            Repr::Flat(entries) => {
                for (k, v) in entries {
                    if (*k.resolve(store)?).eq(key) {
                        return Ok(Some((*v.resolve(store)?).clone()));
                    }
                }
                Ok(None)
            }
            Repr::Branch(children) => {
                let nibble = nibble_at(key_hash, depth);
                match children.iter().find(|(n, _)| *n == nibble) {
                    None => Ok(None),
                    Some((_, child_ref)) => {
                        let child_cell = child_ref.resolve(store)?;
                        let child_map = child_cell
                            .as_map()
                            .ok_or_else(|| DataError::MalformedEncoding("map branch child is not a map".into()))?;
                        Self::get_in(&child_map.repr, store, key, key_hash, depth + 1)
                    }
                }
            }
        }
    }

    pub fn contains_key(&self, store: &dyn CellStore, key: &Cell) -> Result<bool, DataError> {
        Ok(self.get(store, key)?.is_some())
    }

    /// `assoc(k, v)` (§4.2).
    pub fn assoc(&self, store: &dyn CellStore, key: Cell, value: Cell) -> Result<Self, DataError> {
        let key_hash = key.hash();
        let (repr, grew) = Self::assoc_in(
            &self.repr,
            store,
            Ref::new(key),
            key_hash,
            Ref::new(value),
            0,
        )?;
        Ok(PMap {
            count: self.count + usize::from(grew),
            repr,
        })
    }

    /// Returns `(new_repr, key_was_new)`.
    fn assoc_in(
        repr: &Repr,
        store: &dyn CellStore,
        key: Ref,
        key_hash: lattice_types::Hash,
        value: Ref,
        depth: u32,
    ) -> Result<(Repr, bool), DataError> {
        match repr {
            Repr::Flat(entries) => {
                let mut entries = entries.clone();
                let key_cell = key.resolve(store)?;
                let mut found = false;
                for entry in entries.iter_mut() {
                    if *entry.0.resolve(store)? == *key_cell {
                        entry.1 = value.clone();
                        found = true;
                        break;
                    }
                }
                if found {
                    return Ok((Repr::Flat(entries), false));
                }
                if entries.len() < FLAT_THRESHOLD {
                    entries.push((key, value));
                    entries.sort_by(|a, b| {
                        a.0.hash()
                            .as_bytes()
                            .cmp(b.0.hash().as_bytes())
                    });
                    return Ok((Repr::Flat(entries), true));
                }
                // Explode into a branch and re-insert every existing entry
                // plus the new one.
                let mut branch = Repr::Branch(Vec::new());
                for (k, v) in entries {
                    let kh = k.resolve(store)?.hash();
                    let (next, _) = Self::assoc_in(&branch, store, k, kh, v, depth)?;
                    branch = next;
                }
                let (next, _) = Self::assoc_in(&branch, store, key, key_hash, value, depth)?;
                Ok((next, true))
            }
            Repr::Branch(children) => {
                let nibble = nibble_at(&key_hash, depth);
                let mut children = children.clone();
                match children.iter().position(|(n, _)| *n == nibble) {
                    Some(idx) => {
                        let child_cell = children[idx].1.resolve(store)?;
                        let child_map = child_cell.as_map().ok_or_else(|| {
                            DataError::MalformedEncoding("map branch child is not a map".into())
                        })?;
                        let (updated_repr, grew) = Self::assoc_in(
                            &child_map.repr,
                            store,
                            key,
                            key_hash,
                            value,
                            depth + 1,
                        )?;
                        let updated_count = child_map.count + usize::from(grew);
                        children[idx] = (
                            nibble,
                            Ref::new(Cell::Map(PMap {
                                repr: updated_repr,
                                count: updated_count,
                            })),
                        );
                        Ok((Repr::Branch(children), grew))
                    }
                    None => {
                        let leaf = PMap {
                            repr: Repr::Flat(vec![(key, value)]),
                            count: 1,
                        };
                        let pos = children.partition_point(|(n, _)| *n < nibble);
                        children.insert(pos, (nibble, Ref::new(Cell::Map(leaf))));
                        Ok((Repr::Branch(children), true))
                    }
                }
            }
        }
    }

    /// `dissoc(k)` (§4.2). Returns `self` unchanged if the key is absent.
    pub fn dissoc(&self, store: &dyn CellStore, key: &Cell) -> Result<Self, DataError> {
        let key_hash = key.hash();
        match Self::dissoc_in(&self.repr, store, key, &key_hash, 0)? {
            Some(repr) => Ok(PMap {
                count: self.count - 1,
                repr,
            }),
            None => Ok(self.clone()),
        }
    }

    fn dissoc_in(
        repr: &Repr,
        store: &dyn CellStore,
        key: &Cell,
        key_hash: &lattice_types::Hash,
        depth: u32,
    ) -> Result<Option<Repr>, DataError> {
        match repr {
            Repr::Flat(entries) => {
                let mut entries = entries.clone();
                let before = entries.len();
                let mut removed = false;
                let mut kept = Vec::with_capacity(before);
                for (k, v) in entries.drain(..) {
                    if !removed && *k.resolve(store)? == *key {
                        removed = true;
                        continue;
                    }
                    kept.push((k, v));
                }
                if !removed {
                    return Ok(None);
                }
                Ok(Some(Repr::Flat(kept)))
            }
            Repr::Branch(children) => {
                let nibble = nibble_at(key_hash, depth);
                let mut children = children.clone();
                let idx = match children.iter().position(|(n, _)| *n == nibble) {
                    Some(i) => i,
                    None => return Ok(None),
                };
                let child_cell = children[idx].1.resolve(store)?;
                let child_map = child_cell
                    .as_map()
                    .ok_or_else(|| DataError::MalformedEncoding("map branch child is not a map".into()))?;
                match Self::dissoc_in(&child_map.repr, store, key, key_hash, depth + 1)? {
                    None => Ok(None),
                    Some(updated_repr) => {
                        let updated_count = Self::count_repr(&updated_repr, store)?;
                        if updated_count == 0 {
                            children.remove(idx);
                        } else {
                            children[idx] = (
                                nibble,
                                Ref::new(Cell::Map(PMap {
                                    repr: updated_repr,
                                    count: updated_count,
                                })),
                            );
                        }
                        Ok(Some(Repr::Branch(children)))
                    }
                }
            }
        }
    }

    fn count_repr(repr: &Repr, store: &dyn CellStore) -> Result<usize, DataError> {
        match repr {
            Repr::Flat(entries) => Ok(entries.len()),
            Repr::Branch(children) => {
                let mut total = 0;
                for (_, child_ref) in children {
                    let child_cell = child_ref.resolve(store)?;
                    let child_map = child_cell.as_map().ok_or_else(|| {
                        DataError::MalformedEncoding("map branch child is not a map".into())
                    })?;
                    total += child_map.count;
                }
                Ok(total)
            }
        }
    }

    /// All entries, in canonical (ascending key-hash) order.
    pub fn entries(&self, store: &dyn CellStore) -> Result<Vec<(Cell, Cell)>, DataError> {
        let mut out = Vec::with_capacity(self.count);
        Self::collect(&self.repr, store, &mut out)?;
        Ok(out)
    }

    fn collect(
        repr: &Repr,
        store: &dyn CellStore,
        out: &mut Vec<(Cell, Cell)>,
    ) -> Result<(), DataError> {
        match repr {
            Repr::Flat(entries) => {
                for (k, v) in entries {
                    out.push(((*k.resolve(store)?).clone(), (*v.resolve(store)?).clone()));
                }
                Ok(())
            }
            Repr::Branch(children) => {
                for (_, child_ref) in children {
                    let child_cell = child_ref.resolve(store)?;
                    let child_map = child_cell.as_map().ok_or_else(|| {
                        DataError::MalformedEncoding("map branch child is not a map".into())
                    })?;
                    Self::collect(&child_map.repr, store, out)?;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        match &self.repr {
            Repr::Flat(entries) => entries
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect(),
            Repr::Branch(children) => children.iter().map(|(_, r)| r.clone()).collect(),
        }
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        write_vlc_u64(out, self.count as u64);
        match &self.repr {
            Repr::Flat(entries) => {
                out.push(0);
                write_vlc_u64(out, entries.len() as u64);
                for (k, v) in entries {
                    crate::refs_codec::encode_ref(out, k);
                    crate::refs_codec::encode_ref(out, v);
                }
            }
            Repr::Branch(children) => {
                out.push(1);
                write_vlc_u64(out, children.len() as u64);
                for (nibble, child) in children {
                    out.push(*nibble);
                    crate::refs_codec::encode_ref(out, child);
                }
            }
        }
    }

    pub(crate) fn decode_body(bytes: &[u8]) -> Result<(Self, usize), DataError> {
        let (count, mut pos) = read_vlc_u64(bytes)?;
        let count = count as usize;
        let kind = *bytes
            .get(pos)
            .ok_or_else(|| DataError::MalformedEncoding("map kind truncated".into()))?;
        pos += 1;
        let (n, len) = read_vlc_u64(&bytes[pos..])?;
        pos += len;
        let n = n as usize;
        match kind {
            0 => {
                let mut entries = Vec::with_capacity(n);
                for _ in 0..n {
                    let (k, klen) = crate::refs_codec::decode_ref(&bytes[pos..])?;
                    pos += klen;
                    let (v, vlen) = crate::refs_codec::decode_ref(&bytes[pos..])?;
                    pos += vlen;
                    entries.push((k, v));
                }
                Ok((
                    PMap {
                        repr: Repr::Flat(entries),
                        count,
                    },
                    pos,
                ))
            }
            1 => {
                let mut children = Vec::with_capacity(n);
                for _ in 0..n {
                    let nibble = *bytes
                        .get(pos)
                        .ok_or_else(|| DataError::MalformedEncoding("map nibble truncated".into()))?;
                    pos += 1;
                    let (r, rlen) = crate::refs_codec::decode_ref(&bytes[pos..])?;
                    pos += rlen;
                    children.push((nibble, r));
                }
                Ok((
                    PMap {
                        repr: Repr::Branch(children),
                        count,
                    },
                    pos,
                ))
            }
            other => Err(DataError::MalformedEncoding(format!(
                "unknown map repr kind {other}"
            ))),
        }
    }
}

impl PartialEq for PMap {
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count && {
            let mut a = Vec::new();
            self.encode_body(&mut a);
            let mut b = Vec::new();
            other.encode_body(&mut b);
            a == b
        }
    }
}
impl Eq for PMap {}
