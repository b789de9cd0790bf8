//! `Cell`: the single universal value type of the data model (§3, §4.1).
//! Every persistent value — scalar, collection, or signed envelope — is a
//! `Cell`, and every `Cell` has a canonical encoding whose SHA-256 is its
//! hash.

use std::sync::Arc;

use lattice_types::{AccountKey, Address, DataError};

use crate::codec::{read_blob, read_vlc_i64, write_blob, write_vlc_i64, CanonicalEncode};
use crate::map::PMap;
use crate::refs::Ref;
use crate::set::PSet;
use crate::vector::PVector;

const TAG_NIL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_LONG: u8 = 0x02;
const TAG_BLOB: u8 = 0x03;
const TAG_STR: u8 = 0x04;
const TAG_ADDRESS: u8 = 0x05;
const TAG_ACCOUNT_KEY: u8 = 0x06;
const TAG_SYMBOL: u8 = 0x07;
const TAG_KEYWORD: u8 = 0x08;
const TAG_VECTOR: u8 = 0x09;
const TAG_LIST: u8 = 0x0a;
const TAG_MAP: u8 = 0x0b;
const TAG_SET: u8 = 0x0c;
const TAG_SIGNED_DATA: u8 = 0x0d;

/// The universal value type (§3): every value in the system, including the
/// nodes of the persistent collections, is a `Cell`.
#[derive(Clone, Debug)]
pub enum Cell {
    Nil,
    Bool(bool),
    Long(i64),
    Blob(Vec<u8>),
    Str(String),
    Address(Address),
    AccountKey(AccountKey),
    /// An unqualified name, e.g. a local binding.
    Symbol(String),
    /// A self-evaluating name, e.g. a map key or special-form tag.
    Keyword(String),
    Vector(PVector),
    /// Same chunked representation as `Vector`; distinguished only by tag,
    /// as in the teacher's tree-vs-sequence split between `iavl` and
    /// `jellyfish`.
    List(PVector),
    Map(PMap),
    Set(PSet),
    /// A signed envelope around an arbitrary payload cell (§4.3). The
    /// signature itself is opaque bytes here; verification lives in
    /// `lattice-crypto`/`signed`, which this variant is deliberately
    /// decoupled from to avoid a crate cycle.
    SignedData {
        signer: AccountKey,
        signature: [u8; 64],
        payload: Arc<Cell>,
    },
}

impl Cell {
    /// The refs a tree-structured collection cell holds, for embedding and
    /// traversal decisions (§4.1). Scalars and non-collection cells have
    /// none.
    pub fn child_refs(&self) -> Vec<Ref> {
        match self {
            Cell::Vector(v) | Cell::List(v) => v.child_refs(),
            Cell::Map(m) => m.child_refs(),
            Cell::Set(s) => s.child_refs(),
            Cell::SignedData { payload, .. } => vec![Ref::new((**payload).clone())],
            _ => Vec::new(),
        }
    }

    /// Downcasts a resolved cell to its `PVector` body, for `Vector` and
    /// `List` alike — the two share a representation and only differ by
    /// tag (§4.1/§4.2).
    pub fn as_vector_like(&self) -> Option<&PVector> {
        match self {
            Cell::Vector(v) | Cell::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&PMap> {
        match self {
            Cell::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&PSet> {
        match self {
            Cell::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Cell::Long(v) => Some(*v),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Cell::Nil => TAG_NIL,
            Cell::Bool(_) => TAG_BOOL,
            Cell::Long(_) => TAG_LONG,
            Cell::Blob(_) => TAG_BLOB,
            Cell::Str(_) => TAG_STR,
            Cell::Address(_) => TAG_ADDRESS,
            Cell::AccountKey(_) => TAG_ACCOUNT_KEY,
            Cell::Symbol(_) => TAG_SYMBOL,
            Cell::Keyword(_) => TAG_KEYWORD,
            Cell::Vector(_) => TAG_VECTOR,
            Cell::List(_) => TAG_LIST,
            Cell::Map(_) => TAG_MAP,
            Cell::Set(_) => TAG_SET,
            Cell::SignedData { .. } => TAG_SIGNED_DATA,
        }
    }
}

impl CanonicalEncode for Cell {
    fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.tag()];
        match self {
            Cell::Nil => {}
            Cell::Bool(b) => out.push(if *b { 1 } else { 0 }),
            Cell::Long(v) => write_vlc_i64(&mut out, *v),
            Cell::Blob(b) => write_blob(&mut out, b),
            Cell::Str(s) | Cell::Symbol(s) | Cell::Keyword(s) => write_blob(&mut out, s.as_bytes()),
            Cell::Address(a) => out.extend_from_slice(a.as_bytes()),
            Cell::AccountKey(k) => out.extend_from_slice(k.as_bytes()),
            Cell::Vector(v) | Cell::List(v) => v.encode_body(&mut out),
            Cell::Map(m) => m.encode_body(&mut out),
            Cell::Set(s) => s.encode_body(&mut out),
            Cell::SignedData {
                signer,
                signature,
                payload,
            } => {
                out.extend_from_slice(signer.as_bytes());
                out.extend_from_slice(signature);
                write_blob(&mut out, &payload.encode());
            }
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, DataError> {
        let (cell, len) = Self::decode_with_len(bytes)?;
        if len != bytes.len() {
            return Err(DataError::MalformedEncoding(
                "trailing bytes after cell encoding".into(),
            ));
        }
        Ok(cell)
    }
}

impl Cell {
    /// Decodes a cell from a prefix of `bytes`, returning the value and the
    /// number of bytes consumed. Used by tree-structured decoders (vector,
    /// map, set, ref) that embed one cell inline followed by more data.
    pub fn decode_with_len(bytes: &[u8]) -> Result<(Self, usize), DataError> {
        let tag = *bytes
            .first()
            .ok_or_else(|| DataError::MalformedEncoding("empty cell encoding".into()))?;
        let body = &bytes[1..];
        match tag {
            TAG_NIL => Ok((Cell::Nil, 1)),
            TAG_BOOL => {
                let b = *body
                    .first()
                    .ok_or_else(|| DataError::MalformedEncoding("bool truncated".into()))?;
                Ok((Cell::Bool(b != 0), 2))
            }
            TAG_LONG => {
                let (v, len) = read_vlc_i64(body)?;
                Ok((Cell::Long(v), 1 + len))
            }
            TAG_BLOB => {
                let (b, len) = read_blob(body)?;
                Ok((Cell::Blob(b.to_vec()), 1 + len))
            }
            TAG_STR | TAG_SYMBOL | TAG_KEYWORD => {
                let (b, len) = read_blob(body)?;
                let s = String::from_utf8(b.to_vec())
                    .map_err(|e| DataError::MalformedEncoding(e.to_string()))?;
                let cell = match tag {
                    TAG_STR => Cell::Str(s),
                    TAG_SYMBOL => Cell::Symbol(s),
                    _ => Cell::Keyword(s),
                };
                Ok((cell, 1 + len))
            }
            TAG_ADDRESS => {
                let bytes = body
                    .get(..Address::LEN)
                    .ok_or_else(|| DataError::MalformedEncoding("address truncated".into()))?;
                let addr = Address::from_bytes(bytes)
                    .ok_or_else(|| DataError::MalformedEncoding("bad address length".into()))?;
                Ok((Cell::Address(addr), 1 + Address::LEN))
            }
            TAG_ACCOUNT_KEY => {
                let bytes = body.get(..AccountKey::LEN).ok_or_else(|| {
                    DataError::MalformedEncoding("account key truncated".into())
                })?;
                let key = AccountKey::from_bytes(bytes)
                    .ok_or_else(|| DataError::MalformedEncoding("bad account key length".into()))?;
                Ok((Cell::AccountKey(key), 1 + AccountKey::LEN))
            }
            TAG_VECTOR | TAG_LIST => {
                let (v, len) = PVector::decode_body(body)?;
                let cell = if tag == TAG_VECTOR {
                    Cell::Vector(v)
                } else {
                    Cell::List(v)
                };
                Ok((cell, 1 + len))
            }
            TAG_MAP => {
                let (m, len) = PMap::decode_body(body)?;
                Ok((Cell::Map(m), 1 + len))
            }
            TAG_SET => {
                let (s, len) = PSet::decode_body(body)?;
                Ok((Cell::Set(s), 1 + len))
            }
            TAG_SIGNED_DATA => {
                let signer_bytes = body
                    .get(..AccountKey::LEN)
                    .ok_or_else(|| DataError::MalformedEncoding("signer truncated".into()))?;
                let signer = AccountKey::from_bytes(signer_bytes)
                    .ok_or_else(|| DataError::MalformedEncoding("bad signer length".into()))?;
                let mut pos = AccountKey::LEN;
                let sig_bytes = body
                    .get(pos..pos + 64)
                    .ok_or_else(|| DataError::MalformedEncoding("signature truncated".into()))?;
                let mut signature = [0u8; 64];
                signature.copy_from_slice(sig_bytes);
                pos += 64;
                let (payload_bytes, blob_len) = read_blob(&body[pos..])?;
                let payload = Cell::decode(payload_bytes)?;
                pos += blob_len;
                Ok((
                    Cell::SignedData {
                        signer,
                        signature,
                        payload: Arc::new(payload),
                    },
                    1 + pos,
                ))
            }
            other => Err(DataError::UnknownTag(other)),
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.encode() == other.encode()
    }
}
impl Eq for Cell {}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(c: &Cell) {
        let bytes = c.encode();
        let decoded = Cell::decode(&bytes).unwrap();
        assert_eq!(*c, decoded);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(&Cell::Nil);
        round_trip(&Cell::Bool(true));
        round_trip(&Cell::Bool(false));
        round_trip(&Cell::Long(-42));
        round_trip(&Cell::Blob(vec![1, 2, 3]));
        round_trip(&Cell::Str("hello".into()));
        round_trip(&Cell::Symbol("foo".into()));
        round_trip(&Cell::Keyword("bar".into()));
    }

    #[test]
    fn vector_round_trips_through_cell() {
        let v = PVector::from_cells((0..20).map(Cell::Long).collect());
        round_trip(&Cell::Vector(v));
    }

    #[test]
    fn distinct_values_have_distinct_hashes() {
        assert_ne!(Cell::Long(1).hash(), Cell::Long(2).hash());
        assert_ne!(Cell::Str("a".into()).hash(), Cell::Symbol("a".into()).hash());
    }
}
