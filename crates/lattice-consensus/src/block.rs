//! A Block (§4.5): produced by exactly one peer, embedding that peer's
//! key, carrying the transactions it proposes be applied together.

use lattice_data::codec::{read_vlc_i64, read_vlc_u64, write_vlc_i64, write_vlc_u64};
use lattice_data::CanonicalEncode;
use lattice_types::{AccountKey, DataError};
use lattice_vm::Transaction;

/// One block: a peer's proposal of an ordered batch of transactions at a
/// given timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub peer: AccountKey,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(peer: AccountKey, timestamp: i64, transactions: Vec<Transaction>) -> Self {
        Block {
            peer,
            timestamp,
            transactions,
        }
    }
}

impl CanonicalEncode for Block {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.peer.as_bytes());
        write_vlc_i64(&mut out, self.timestamp);
        write_vlc_u64(&mut out, self.transactions.len() as u64);
        for tx in &self.transactions {
            let bytes = tx.encode();
            write_vlc_u64(&mut out, bytes.len() as u64);
            out.extend_from_slice(&bytes);
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, DataError> {
        let peer_bytes = bytes
            .get(..AccountKey::LEN)
            .ok_or_else(|| DataError::MalformedEncoding("block peer truncated".into()))?;
        let peer = AccountKey::from_bytes(peer_bytes)
            .ok_or_else(|| DataError::MalformedEncoding("bad peer key length".into()))?;
        let mut pos = AccountKey::LEN;
        let (timestamp, len) = read_vlc_i64(&bytes[pos..])?;
        pos += len;
        let (count, len) = read_vlc_u64(&bytes[pos..])?;
        pos += len;
        let mut transactions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (tx_len, len) = read_vlc_u64(&bytes[pos..])?;
            pos += len;
            let tx_bytes = bytes
                .get(pos..pos + tx_len as usize)
                .ok_or_else(|| DataError::MalformedEncoding("block transaction truncated".into()))?;
            transactions.push(Transaction::decode(tx_bytes)?);
            pos += tx_len as usize;
        }
        Ok(Block {
            peer,
            timestamp,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_data::Cell;
    use lattice_vm::Op;

    #[test]
    fn block_round_trips() {
        let block = Block::new(
            AccountKey::from_bytes(&[1u8; 32]).unwrap(),
            42,
            vec![Transaction {
                signer: lattice_types::Address::from_bytes(&[2u8; 32]).unwrap(),
                sequence: 3,
                op: Op::Constant(Cell::Long(9)),
            }],
        );
        let bytes = block.encode();
        assert_eq!(Block::decode(&bytes).unwrap(), block);
    }
}
