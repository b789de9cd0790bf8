//! Persistent, log-structured Vector (§3, §4.2): chunked into fixed-size
//! leaves of 16 elements, with a balanced tree over chunks once a vector
//! exceeds 16 elements. Canonical form: the last partial chunk is the only
//! incomplete one; indexed access is O(log₁₆ n).
//!
//! Grounded on `ioi-state::tree::jellyfish::node`'s branching-factor-16,
//! hash-addressed node shape (`Node::Internal` / `Node::Leaf`), generalized
//! from a sparse trie keyed by account hash to a dense, order-preserving
//! chunked sequence.

use lattice_types::DataError;

use crate::cell::Cell;
use crate::codec::{read_vlc_u64, write_vlc_u64};
use crate::refs::{CellStore, Ref};

pub const CHUNK_SIZE: usize = 16;

#[derive(Clone, Debug)]
enum Repr {
    /// 0..=16 element refs.
    Leaf(Vec<Ref>),
    /// `height >= 1`; each child ref resolves to a `Cell::Vector` (or
    /// `Cell::List`) of `height - 1`. `sizes[i]` is the element count held
    /// by `children[i]`.
    Node {
        height: u32,
        children: Vec<Ref>,
        sizes: Vec<usize>,
    },
}

/// A persistent, structurally-shared vector of cells.
#[derive(Clone, Debug)]
pub struct PVector {
    repr: Repr,
    count: usize,
}

impl PVector {
    pub fn empty() -> Self {
        PVector {
            repr: Repr::Leaf(Vec::new()),
            count: 0,
        }
    }

    pub fn from_cells(cells: Vec<Cell>) -> Self {
        let mut v = PVector::empty();
        let store = crate::refs::NullStore;
        for c in cells {
            // Infallible: NullStore is only consulted when resolving
            // `Hashed` refs, and every ref built here starts `Direct`.
            v = v.append(&store, c).unwrap_or(v);
        }
        v
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn height(&self) -> u32 {
        match &self.repr {
            Repr::Leaf(_) => 0,
            Repr::Node { height, .. } => *height,
        }
    }

    /// `get(i)` (§4.2): O(log₁₆ n).
    pub fn get(&self, index: usize, store: &dyn CellStore) -> Result<Cell, DataError> {
        if index >= self.count {
            return Err(DataError::NotFound(format!(
                "vector index {index} out of bounds (count {})",
                self.count
            )));
        }
        Self::get_in(&self.repr, index, store)
    }

    fn get_in(repr: &Repr, index: usize, store: &dyn CellStore) -> Result<Cell, DataError> {
        match repr {
            Repr::Leaf(items) => {
                let r = items.get(index).ok_or_else(|| {
                    DataError::NotFound(format!("leaf index {index} out of bounds"))
                })?;
                Ok((*r.resolve(store)?).clone())
            }
            Repr::Node { children, sizes, .. } => {
                let (child_idx, offset) = Self::locate(sizes, index)?;
                let child_cell = children[child_idx].resolve(store)?;
                let child_vec = child_cell.as_vector_like().ok_or_else(|| {
                    DataError::MalformedEncoding("vector tree child is not a vector".into())
                })?;
                Self::get_in(&child_vec.repr, offset, store)
            }
        }
    }

    fn locate(sizes: &[usize], mut index: usize) -> Result<(usize, usize), DataError> {
        for (i, &size) in sizes.iter().enumerate() {
            if index < size {
                return Ok((i, index));
            }
            index -= size;
        }
        Err(DataError::NotFound("vector index out of bounds".into()))
    }

    /// `append(v)` (§4.2): amortized O(1).
    pub fn append(&self, store: &dyn CellStore, x: Cell) -> Result<Self, DataError> {
        let new_ref = Ref::new(x);
        let (updated, split) = Self::append_into(&self.repr, self.height(), store, new_ref)?;
        let repr = match split {
            None => updated,
            Some(sibling) => {
                let updated_count = Self::repr_count(&updated);
                let sibling_count = Self::repr_count(&sibling);
                Repr::Node {
                    height: self.height() + 1,
                    sizes: vec![updated_count, sibling_count],
                    children: vec![
                        Ref::new(Cell::Vector(PVector {
                            repr: updated,
                            count: updated_count,
                        })),
                        Ref::new(Cell::Vector(PVector {
                            repr: sibling,
                            count: sibling_count,
                        })),
                    ],
                }
            }
        };
        Ok(PVector {
            count: self.count + 1,
            repr,
        })
    }

    fn repr_count(repr: &Repr) -> usize {
        match repr {
            Repr::Leaf(items) => items.len(),
            Repr::Node { sizes, .. } => sizes.iter().sum(),
        }
    }

    /// Returns `(updated_node, overflow_sibling)`. `overflow_sibling` is
    /// `Some` only when this node was already full and a new sibling at the
    /// same height had to be created to hold `x`.
    fn append_into(
        repr: &Repr,
        height: u32,
        store: &dyn CellStore,
        x: Ref,
    ) -> Result<(Repr, Option<Repr>), DataError> {
        match repr {
            Repr::Leaf(items) => {
                if items.len() < CHUNK_SIZE {
                    let mut items = items.clone();
                    items.push(x);
                    Ok((Repr::Leaf(items), None))
                } else {
                    Ok((repr.clone(), Some(Repr::Leaf(vec![x]))))
                }
            }
            Repr::Node {
                height: h,
                children,
                sizes,
            } => {
                debug_assert_eq!(*h, height);
                let last = children.len() - 1;
                let last_cell = children[last].resolve(store)?;
                let last_vec = last_cell.as_vector_like().ok_or_else(|| {
                    DataError::MalformedEncoding("vector tree child is not a vector".into())
                })?;
                let (updated_child, child_split) =
                    Self::append_into(&last_vec.repr, height - 1, store, x)?;

                match child_split {
                    None => {
                        let mut children = children.clone();
                        let mut sizes = sizes.clone();
                        sizes[last] = Self::repr_count(&updated_child);
                        children[last] = Ref::new(Cell::Vector(PVector {
                            repr: updated_child,
                            count: sizes[last],
                        }));
                        Ok((
                            Repr::Node {
                                height,
                                children,
                                sizes,
                            },
                            None,
                        ))
                    }
                    Some(sibling) => {
                        let mut children = children.clone();
                        let mut sizes = sizes.clone();
                        sizes[last] = Self::repr_count(&updated_child);
                        children[last] = Ref::new(Cell::Vector(PVector {
                            repr: updated_child,
                            count: sizes[last],
                        }));
                        if children.len() < CHUNK_SIZE {
                            sizes.push(Self::repr_count(&sibling));
                            children.push(Ref::new(Cell::Vector(PVector {
                                repr: sibling,
                                count: *sizes.last().unwrap_or(&0),
                            })));
                            Ok((
                                Repr::Node {
                                    height,
                                    children,
                                    sizes,
                                },
                                None,
                            ))
                        } else {
                            Ok((
                                Repr::Node {
                                    height,
                                    children,
                                    sizes,
                                },
                                Some(Repr::Node {
                                    height,
                                    sizes: vec![Self::repr_count(&sibling)],
                                    children: vec![Ref::new(Cell::Vector(PVector {
                                        repr: sibling.clone(),
                                        count: Self::repr_count(&sibling),
                                    }))],
                                }),
                            ))
                        }
                    }
                }
            }
        }
    }

    /// `assoc(i, v)` (§4.2).
    pub fn assoc(&self, store: &dyn CellStore, index: usize, x: Cell) -> Result<Self, DataError> {
        if index >= self.count {
            return Err(DataError::NotFound(format!(
                "vector index {index} out of bounds (count {})",
                self.count
            )));
        }
        let repr = Self::assoc_in(&self.repr, index, store, Ref::new(x))?;
        Ok(PVector {
            repr,
            count: self.count,
        })
    }

    fn assoc_in(
        repr: &Repr,
        index: usize,
        store: &dyn CellStore,
        x: Ref,
    ) -> Result<Repr, DataError> {
        match repr {
            Repr::Leaf(items) => {
                let mut items = items.clone();
                if index >= items.len() {
                    return Err(DataError::NotFound("leaf assoc out of bounds".into()));
                }
                items[index] = x;
                Ok(Repr::Leaf(items))
            }
            Repr::Node {
                height,
                children,
                sizes,
            } => {
                let (child_idx, offset) = Self::locate(sizes, index)?;
                let child_cell = children[child_idx].resolve(store)?;
                let child_vec = child_cell.as_vector_like().ok_or_else(|| {
                    DataError::MalformedEncoding("vector tree child is not a vector".into())
                })?;
                let updated = Self::assoc_in(&child_vec.repr, offset, store, x)?;
                let mut children = children.clone();
                children[child_idx] = Ref::new(Cell::Vector(PVector {
                    repr: updated,
                    count: sizes[child_idx],
                }));
                Ok(Repr::Node {
                    height: *height,
                    children,
                    sizes: sizes.clone(),
                })
            }
        }
    }

    /// `concat(b)` (§4.2). Implemented as repeated append; correct but not
    /// the ideal O(log n) tree-merge.
    pub fn concat(&self, store: &dyn CellStore, other: &PVector) -> Result<Self, DataError> {
        let mut out = self.clone();
        for i in 0..other.count() {
            out = out.append(store, other.get(i, store)?)?;
        }
        Ok(out)
    }

    /// `sub-vector(start, length)` (§4.2).
    pub fn sub_vector(
        &self,
        store: &dyn CellStore,
        start: usize,
        length: usize,
    ) -> Result<Self, DataError> {
        if start + length > self.count {
            return Err(DataError::NotFound(format!(
                "sub-vector range {start}..{} out of bounds (count {})",
                start + length,
                self.count
            )));
        }
        let mut out = PVector::empty();
        for i in start..start + length {
            out = out.append(store, self.get(i, store)?)?;
        }
        Ok(out)
    }

    /// `next()` (§4.2): the vector without its first element.
    pub fn next(&self, store: &dyn CellStore) -> Result<Option<Self>, DataError> {
        if self.count == 0 {
            return Ok(None);
        }
        Ok(Some(self.sub_vector(store, 1, self.count - 1)?))
    }

    /// `common-prefix-length(b)` (§4.2).
    pub fn common_prefix_length(&self, store: &dyn CellStore, other: &PVector) -> Result<usize, DataError> {
        let n = self.count.min(other.count());
        let mut i = 0;
        while i < n && self.get(i, store)? == other.get(i, store)? {
            i += 1;
        }
        Ok(i)
    }

    pub(crate) fn child_refs(&self) -> Vec<Ref> {
        match &self.repr {
            Repr::Leaf(items) => items.clone(),
            Repr::Node { children, .. } => children.clone(),
        }
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        write_vlc_u64(out, self.count as u64);
        match &self.repr {
            Repr::Leaf(items) => {
                for r in items {
                    crate::refs_codec::encode_ref(out, r);
                }
            }
            Repr::Node {
                height,
                children,
                sizes,
            } => {
                write_vlc_u64(out, *height as u64);
                write_vlc_u64(out, children.len() as u64);
                for size in sizes {
                    write_vlc_u64(out, *size as u64);
                }
                for r in children {
                    crate::refs_codec::encode_ref(out, r);
                }
            }
        }
    }

    pub(crate) fn decode_body(bytes: &[u8]) -> Result<(Self, usize), DataError> {
        let (count, mut pos) = read_vlc_u64(bytes)?;
        let count = count as usize;
        if count <= CHUNK_SIZE {
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let (r, len) = crate::refs_codec::decode_ref(&bytes[pos..])?;
                items.push(r);
                pos += len;
            }
            Ok((
                PVector {
                    repr: Repr::Leaf(items),
                    count,
                },
                pos,
            ))
        } else {
            let (height, len) = read_vlc_u64(&bytes[pos..])?;
            pos += len;
            let (n_children, len) = read_vlc_u64(&bytes[pos..])?;
            pos += len;
            let n_children = n_children as usize;
            let mut sizes = Vec::with_capacity(n_children);
            for _ in 0..n_children {
                let (size, len) = read_vlc_u64(&bytes[pos..])?;
                sizes.push(size as usize);
                pos += len;
            }
            let mut children = Vec::with_capacity(n_children);
            for _ in 0..n_children {
                let (r, len) = crate::refs_codec::decode_ref(&bytes[pos..])?;
                children.push(r);
                pos += len;
            }
            Ok((
                PVector {
                    repr: Repr::Node {
                        height: height as u32,
                        children,
                        sizes,
                    },
                    count,
                },
                pos,
            ))
        }
    }
}

impl PartialEq for PVector {
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count && {
            let mut out_a = Vec::new();
            self.encode_body(&mut out_a);
            let mut out_b = Vec::new();
            other.encode_body(&mut out_b);
            out_a == out_b
        }
    }
}
impl Eq for PVector {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::NullStore;

    fn longs(n: i64) -> Vec<Cell> {
        (0..n).map(Cell::Long).collect()
    }

    #[test]
    fn append_then_get_is_identity() {
        let store = NullStore;
        let v = PVector::from_cells(longs(50));
        assert_eq!(v.count(), 50);
        for i in 0..50 {
            assert_eq!(v.get(i as usize, &store).unwrap(), Cell::Long(i));
        }
    }

    #[test]
    fn append_preserves_prefix_and_new_tail_readable() {
        let store = NullStore;
        let v = PVector::from_cells(longs(16));
        let v2 = v.append(&store, Cell::Long(99)).unwrap();
        assert_eq!(v2.get(16, &store).unwrap(), Cell::Long(99));
        assert_eq!(v2.get(0, &store).unwrap(), Cell::Long(0));
    }

    #[test]
    fn assoc_replaces_single_element() {
        let store = NullStore;
        let v = PVector::from_cells(longs(40));
        let v2 = v.assoc(&store, 20, Cell::Long(-1)).unwrap();
        assert_eq!(v2.get(20, &store).unwrap(), Cell::Long(-1));
        assert_eq!(v2.get(19, &store).unwrap(), Cell::Long(19));
        assert_eq!(v2.count(), v.count());
    }

    #[test]
    fn sub_vector_of_whole_vector_is_itself() {
        let store = NullStore;
        let v = PVector::from_cells(longs(33));
        let sub = v.sub_vector(&store, 0, v.count()).unwrap();
        assert_eq!(sub, v);
    }

    #[test]
    fn common_prefix_length_detects_divergence() {
        let store = NullStore;
        let a = PVector::from_cells(longs(20));
        let mut b_cells = longs(20);
        b_cells[10] = Cell::Long(-1);
        let b = PVector::from_cells(b_cells);
        assert_eq!(a.common_prefix_length(&store, &b).unwrap(), 10);
    }
}
