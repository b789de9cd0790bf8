//! A signable unit of execution (§4.4, §4.5): the program a block entry
//! carries before it is applied. Blocks hold these wrapped in
//! `lattice_data::signed::Unverified`.

use lattice_data::codec::{read_vlc_u64, write_vlc_u64};
use lattice_data::CanonicalEncode;
use lattice_types::{Address, DataError};

use crate::ops::Op;

/// One transaction: a program to run against `signer`'s account at
/// `sequence` (§4.4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub signer: Address,
    pub sequence: u64,
    pub op: Op,
}

impl CanonicalEncode for Transaction {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.signer.as_bytes());
        write_vlc_u64(&mut out, self.sequence);
        out.extend_from_slice(&self.op.encode());
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, DataError> {
        let signer_bytes = bytes
            .get(..Address::LEN)
            .ok_or_else(|| DataError::MalformedEncoding("transaction signer truncated".into()))?;
        let signer = Address::from_bytes(signer_bytes)
            .ok_or_else(|| DataError::MalformedEncoding("bad signer length".into()))?;
        let (sequence, len) = read_vlc_u64(&bytes[Address::LEN..])?;
        let op = Op::decode(&bytes[Address::LEN + len..])?;
        Ok(Transaction {
            signer,
            sequence,
            op,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_data::Cell;

    #[test]
    fn transaction_round_trips() {
        let tx = Transaction {
            signer: Address::from_bytes(&[3u8; 32]).unwrap(),
            sequence: 7,
            op: Op::Constant(Cell::Long(42)),
        };
        let bytes = tx.encode();
        assert_eq!(Transaction::decode(&bytes).unwrap(), tx);
    }
}
