//! A peer's Order (§4.5): its own chain of proposed blocks, with a
//! proposal-point and consensus-point watermark. Immutable-value style:
//! every operation returns a new `Order`.

use lattice_data::codec::write_vlc_u64;
use lattice_data::CanonicalEncode;
use lattice_types::{AccountKey, ConsensusProtocolError, DataError};

use crate::block::Block;

/// One peer's ordered chain of blocks and its watermarks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    peer: AccountKey,
    blocks: Vec<Block>,
    proposal_point: u64,
    consensus_point: u64,
}

impl Order {
    /// An empty Order for `peer`, both watermarks at zero (§4.7 `create`).
    pub fn empty(peer: AccountKey) -> Self {
        Order {
            peer,
            blocks: Vec::new(),
            proposal_point: 0,
            consensus_point: 0,
        }
    }

    pub fn peer(&self) -> &AccountKey {
        &self.peer
    }

    pub fn consensus_point(&self) -> u64 {
        self.consensus_point
    }

    pub fn proposal_point(&self) -> u64 {
        self.proposal_point
    }

    pub fn block_count(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn block_at(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    pub fn blocks_upto(&self, n: u64) -> &[Block] {
        let end = (n as usize).min(self.blocks.len());
        &self.blocks[..end]
    }

    /// Appends `block`, advancing the proposal-point to the new block
    /// count (§4.5).
    pub fn propose(&self, block: Block) -> Self {
        let mut blocks = self.blocks.clone();
        blocks.push(block);
        Order {
            peer: self.peer,
            proposal_point: blocks.len() as u64,
            consensus_point: self.consensus_point,
            blocks,
        }
    }

    /// Sets the consensus-point to `n`, requiring `n <= proposal_point`
    /// (§4.5 invariant).
    pub fn update_consensus_point(&self, n: u64) -> Result<Self, ConsensusProtocolError> {
        if n > self.proposal_point {
            return Err(ConsensusProtocolError::ConsensusAheadOfProposal {
                point: n,
                proposal_point: self.proposal_point,
            });
        }
        Ok(Order {
            peer: self.peer,
            blocks: self.blocks.clone(),
            proposal_point: self.proposal_point,
            consensus_point: n,
        })
    }

    /// Rewrites the blocks at and beyond `from` to `replacement`, used by
    /// the merge protocol's "propose what others propose" step (§4.6 step
    /// 4). `from` must not be below the consensus-point: confirmed history
    /// is never rewritten.
    pub fn rewrite_from(&self, from: u64, replacement: Vec<Block>) -> Self {
        debug_assert!(from >= self.consensus_point);
        let mut blocks = self.blocks[..(from as usize).min(self.blocks.len())].to_vec();
        blocks.extend(replacement);
        Order {
            peer: self.peer,
            proposal_point: blocks.len() as u64,
            consensus_point: self.consensus_point,
            blocks,
        }
    }
}

impl CanonicalEncode for Order {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.peer.as_bytes());
        write_vlc_u64(&mut out, self.proposal_point);
        write_vlc_u64(&mut out, self.consensus_point);
        write_vlc_u64(&mut out, self.blocks.len() as u64);
        for block in &self.blocks {
            let bytes = block.encode();
            write_vlc_u64(&mut out, bytes.len() as u64);
            out.extend_from_slice(&bytes);
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, DataError> {
        let peer_bytes = bytes
            .get(..AccountKey::LEN)
            .ok_or_else(|| DataError::MalformedEncoding("order peer truncated".into()))?;
        let peer = AccountKey::from_bytes(peer_bytes)
            .ok_or_else(|| DataError::MalformedEncoding("bad peer key length".into()))?;
        let mut pos = AccountKey::LEN;
        let (proposal_point, len) = lattice_data::codec::read_vlc_u64(&bytes[pos..])?;
        pos += len;
        let (consensus_point, len) = lattice_data::codec::read_vlc_u64(&bytes[pos..])?;
        pos += len;
        let (count, len) = lattice_data::codec::read_vlc_u64(&bytes[pos..])?;
        pos += len;
        let mut blocks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (block_len, len) = lattice_data::codec::read_vlc_u64(&bytes[pos..])?;
            pos += len;
            let block_bytes = bytes
                .get(pos..pos + block_len as usize)
                .ok_or_else(|| DataError::MalformedEncoding("order block truncated".into()))?;
            blocks.push(Block::decode(block_bytes)?);
            pos += block_len as usize;
        }
        Ok(Order {
            peer,
            blocks,
            proposal_point,
            consensus_point,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> AccountKey {
        AccountKey::from_bytes(&[7u8; 32]).unwrap()
    }

    fn block(peer: AccountKey, ts: i64) -> Block {
        Block::new(peer, ts, Vec::new())
    }

    #[test]
    fn propose_advances_proposal_point() {
        let order = Order::empty(peer()).propose(block(peer(), 1));
        assert_eq!(order.proposal_point(), 1);
        assert_eq!(order.consensus_point(), 0);
        assert_eq!(order.block_count(), 1);
    }

    #[test]
    fn update_consensus_point_rejects_past_proposal_point() {
        let order = Order::empty(peer()).propose(block(peer(), 1));
        let err = order.update_consensus_point(2).unwrap_err();
        assert_eq!(
            err,
            ConsensusProtocolError::ConsensusAheadOfProposal {
                point: 2,
                proposal_point: 1
            }
        );
    }

    #[test]
    fn order_round_trips() {
        let order = Order::empty(peer())
            .propose(block(peer(), 1))
            .propose(block(peer(), 2));
        let order = order.update_consensus_point(1).unwrap();
        let bytes = order.encode();
        assert_eq!(Order::decode(&bytes).unwrap(), order);
    }
}
