//! Encoding for [`Ref`] (§6): either an embedded inline cell (first byte
//! distinguishes) or a 32-byte hash.

use lattice_types::{DataError, Hash};

use crate::cell::Cell;
use crate::codec::CanonicalEncode;
use crate::refs::Ref;

const MARKER_EMBEDDED: u8 = 0x00;
const MARKER_HASHED: u8 = 0x01;

pub fn encode_ref(out: &mut Vec<u8>, r: &Ref) {
    if r.is_embedded() {
        out.push(MARKER_EMBEDDED);
        // `is_embedded` only returns true when the cell is resolved.
        if let Some(cell) = r.peek() {
            out.extend_from_slice(&cell.encode());
            return;
        }
    }
    out.push(MARKER_HASHED);
    out.extend_from_slice(r.hash().as_bytes());
}

pub fn decode_ref(bytes: &[u8]) -> Result<(Ref, usize), DataError> {
    let marker = *bytes
        .first()
        .ok_or_else(|| DataError::MalformedEncoding("ref marker truncated".into()))?;
    match marker {
        MARKER_EMBEDDED => {
            let (cell, len) = Cell::decode_with_len(&bytes[1..])?;
            Ok((Ref::new(cell), 1 + len))
        }
        MARKER_HASHED => {
            let hash_bytes = bytes
                .get(1..1 + Hash::LEN)
                .ok_or_else(|| DataError::MalformedEncoding("ref hash truncated".into()))?;
            let hash = Hash::from_bytes(hash_bytes)
                .ok_or_else(|| DataError::MalformedEncoding("invalid hash length".into()))?;
            Ok((Ref::from_hash(hash), 1 + Hash::LEN))
        }
        other => Err(DataError::MalformedEncoding(format!(
            "unknown ref marker 0x{other:02x}"
        ))),
    }
}
