//! The persisted root record (§4.7 `persist-state`/`restore`): enough to
//! reconstruct a `Peer`'s belief and state lineage from the store, with the
//! states and Orders themselves stored separately under their own hashes.

use lattice_crypto::Signature;
use lattice_data::codec::{read_vlc_i64, read_vlc_u64, write_vlc_i64, write_vlc_u64};
use lattice_data::CanonicalEncode;
use lattice_types::{AccountKey, DataError, Hash};

/// Everything needed to walk back from one root hash to a full `Peer`:
/// each peer's signature over its Order (the Order itself stored under
/// `order_hash`), and the hash of each World State cell in lineage order.
pub struct PeerRoot {
    pub our_key: AccountKey,
    pub belief: Vec<(AccountKey, Signature, Hash)>,
    pub state_hashes: Vec<Hash>,
    pub state_timestamps: Vec<i64>,
    pub last_timestamp: i64,
}

impl CanonicalEncode for PeerRoot {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.our_key.as_bytes());
        write_vlc_u64(&mut out, self.belief.len() as u64);
        for (peer, signature, order_hash) in &self.belief {
            out.extend_from_slice(peer.as_bytes());
            out.extend_from_slice(signature.as_bytes());
            out.extend_from_slice(order_hash.as_bytes());
        }
        write_vlc_u64(&mut out, self.state_hashes.len() as u64);
        for (hash, timestamp) in self.state_hashes.iter().zip(&self.state_timestamps) {
            out.extend_from_slice(hash.as_bytes());
            write_vlc_i64(&mut out, *timestamp);
        }
        write_vlc_i64(&mut out, self.last_timestamp);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, DataError> {
        let our_key_bytes = bytes
            .get(..AccountKey::LEN)
            .ok_or_else(|| DataError::MalformedEncoding("peer root key truncated".into()))?;
        let our_key = AccountKey::from_bytes(our_key_bytes)
            .ok_or_else(|| DataError::MalformedEncoding("bad peer root key length".into()))?;
        let mut pos = AccountKey::LEN;

        let (belief_count, len) = read_vlc_u64(&bytes[pos..])?;
        pos += len;
        let mut belief = Vec::with_capacity(belief_count as usize);
        for _ in 0..belief_count {
            let peer_bytes = bytes
                .get(pos..pos + AccountKey::LEN)
                .ok_or_else(|| DataError::MalformedEncoding("peer root entry truncated".into()))?;
            let peer = AccountKey::from_bytes(peer_bytes)
                .ok_or_else(|| DataError::MalformedEncoding("bad belief peer length".into()))?;
            pos += AccountKey::LEN;
            let sig_bytes = bytes
                .get(pos..pos + 64)
                .ok_or_else(|| DataError::MalformedEncoding("peer root signature truncated".into()))?;
            let signature = Signature::from_bytes(sig_bytes)
                .map_err(|e| DataError::MalformedEncoding(e.to_string()))?;
            pos += 64;
            let hash_bytes = bytes
                .get(pos..pos + Hash::LEN)
                .ok_or_else(|| DataError::MalformedEncoding("peer root order hash truncated".into()))?;
            let order_hash = Hash::from_bytes(hash_bytes)
                .ok_or_else(|| DataError::MalformedEncoding("bad order hash length".into()))?;
            pos += Hash::LEN;
            belief.push((peer, signature, order_hash));
        }

        let (state_count, len) = read_vlc_u64(&bytes[pos..])?;
        pos += len;
        let mut state_hashes = Vec::with_capacity(state_count as usize);
        let mut state_timestamps = Vec::with_capacity(state_count as usize);
        for _ in 0..state_count {
            let hash_bytes = bytes
                .get(pos..pos + Hash::LEN)
                .ok_or_else(|| DataError::MalformedEncoding("peer root state hash truncated".into()))?;
            let hash = Hash::from_bytes(hash_bytes)
                .ok_or_else(|| DataError::MalformedEncoding("bad state hash length".into()))?;
            pos += Hash::LEN;
            let (timestamp, len) = read_vlc_i64(&bytes[pos..])?;
            pos += len;
            state_hashes.push(hash);
            state_timestamps.push(timestamp);
        }

        let (last_timestamp, _) = read_vlc_i64(&bytes[pos..])?;

        Ok(PeerRoot {
            our_key,
            belief,
            state_hashes,
            state_timestamps,
            last_timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_root_round_trips() {
        let our_key = AccountKey::from_bytes(&[1u8; 32]).unwrap();
        let root = PeerRoot {
            our_key,
            belief: vec![(our_key, Signature([2u8; 64]), Hash([3u8; 32]))],
            state_hashes: vec![Hash([4u8; 32]), Hash([5u8; 32])],
            state_timestamps: vec![0, 10],
            last_timestamp: 10,
        };
        let bytes = root.encode();
        let decoded = PeerRoot::decode(&bytes).unwrap();
        assert_eq!(decoded.our_key, root.our_key);
        assert_eq!(decoded.belief, root.belief);
        assert_eq!(decoded.state_hashes, root.state_hashes);
        assert_eq!(decoded.state_timestamps, root.state_timestamps);
        assert_eq!(decoded.last_timestamp, root.last_timestamp);
    }
}
