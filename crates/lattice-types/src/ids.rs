//! Fixed-size identifiers used throughout the consensus core.
//!
//! `Hash` addresses cells in the store (§3, §4.1); `Address` identifies
//! accounts; `AccountKey` identifies peers and may own accounts (§3).

use std::fmt;

macro_rules! fixed_bytes_id {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
                if bytes.len() != $len {
                    return None;
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(bytes);
                Some(Self(out))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }
    };
}

fixed_bytes_id!(Hash, 32);
fixed_bytes_id!(Address, 32);
fixed_bytes_id!(AccountKey, 32);
