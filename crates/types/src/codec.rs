//! SBOR encoding and content hashing of chain types.
//!
//! Everything persisted or hashed by the processor goes through these two
//! functions, so a value always round-trips losslessly and its identity is
//! stable across nodes.

use crate::Hash;
use sbor::prelude::{BasicDecode, BasicEncode};
use thiserror::Error;

/// Errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("SBOR encode error: {0}")]
    Encode(String),

    #[error("SBOR decode error: {0}")]
    Decode(String),
}

/// Encode a value to its SBOR byte representation.
pub fn encode<T: BasicEncode + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    sbor::basic_encode(value).map_err(|e| CodecError::Encode(format!("{:?}", e)))
}

/// Decode a value from its SBOR byte representation.
pub fn decode<T: BasicDecode>(bytes: &[u8]) -> Result<T, CodecError> {
    sbor::basic_decode(bytes).map_err(|e| CodecError::Decode(format!("{:?}", e)))
}

/// Content hash of a value's encoding.
pub fn hash_of<T: BasicEncode + ?Sized>(value: &T) -> Result<Hash, CodecError> {
    Ok(Hash::compute(&encode(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MiniBlock, MiniBlockType, ShardId};

    #[test]
    fn test_roundtrip_miniblock() {
        let mb = MiniBlock {
            sender_shard: ShardId(1),
            receiver_shard: ShardId(0),
            kind: MiniBlockType::SmartContractResult,
            tx_hashes: vec![Hash::compute(b"a"), Hash::compute(b"b")],
        };

        let bytes = encode(&mb).unwrap();
        let decoded: MiniBlock = decode(&bytes).unwrap();
        assert_eq!(decoded, mb);
    }

    #[test]
    fn test_hash_of_tracks_content() {
        let mut mb = MiniBlock {
            sender_shard: ShardId(1),
            receiver_shard: ShardId(0),
            kind: MiniBlockType::Tx,
            tx_hashes: vec![Hash::compute(b"a")],
        };
        let before = hash_of(&mb).unwrap();
        mb.tx_hashes.push(Hash::compute(b"b"));
        assert_ne!(before, hash_of(&mb).unwrap());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let res: Result<MiniBlock, _> = decode(&[0xff, 0x00, 0x13]);
        assert!(res.is_err());
    }
}
