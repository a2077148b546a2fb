//! Content hashing primitive.

use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte content hash.
///
/// Chain identities (miniblocks, shard headers, metablocks) are SHA-256
/// digests of the object's SBOR encoding.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, sbor::prelude::BasicSbor,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash, used as the origin link of start headers.
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// Hash arbitrary bytes.
    pub fn compute(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash(out)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable; full digest via Display.
        write!(f, "{}", &hex::encode(self.0)[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_is_deterministic() {
        let a = Hash::compute(b"tessera");
        let b = Hash::compute(b"tessera");
        assert_eq!(a, b);
        assert_ne!(a, Hash::compute(b"tesserb"));
    }

    #[test]
    fn test_zero_hash() {
        assert!(Hash::ZERO.is_zero());
        assert!(!Hash::compute(b"x").is_zero());
    }

    #[test]
    fn test_display_is_hex() {
        let h = Hash::ZERO;
        assert_eq!(h.to_string(), "0".repeat(64));
    }
}
