//! Opaque block and header payloads moved by the sync pool
//!
//! The pool never inspects these beyond height and hash: proof-of-work,
//! merkle roots and transaction content belong to the storage and
//! verification layers, which live outside this crate.

use serde::{Deserialize, Serialize};

use crate::core::Height;

/// A block as delivered by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height.
    pub height: Height,
    /// Block hash, as reported by the peer.
    pub hash: String,
    /// Hash of the preceding block.
    pub previous_hash: String,
    /// Opaque serialized block body (transactions, commit, etc).
    pub payload: Vec<u8>,
}

impl Block {
    pub fn new(height: Height, hash: String, previous_hash: String, payload: Vec<u8>) -> Self {
        Self {
            height,
            hash,
            previous_hash,
            payload,
        }
    }

    /// Size in bytes as accounted by the receive-rate monitor.
    pub fn serialized_size(&self) -> usize {
        self.payload.len()
    }
}

/// A header as delivered by a witness peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Header height, must match the block requester's height.
    pub height: Height,
    /// Header hash.
    pub hash: String,
    /// Opaque serialized header body.
    pub payload: Vec<u8>,
}

impl BlockHeader {
    pub fn new(height: Height, hash: String, payload: Vec<u8>) -> Self {
        Self {
            height,
            hash,
            payload,
        }
    }

    pub fn serialized_size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_serialized_size_is_payload_len() {
        let b = Block::new(Height(1), "h".into(), "p".into(), vec![0u8; 42]);
        assert_eq!(b.serialized_size(), 42);
    }

    #[test]
    fn header_serialized_size_is_payload_len() {
        let h = BlockHeader::new(Height(1), "h".into(), vec![0u8; 7]);
        assert_eq!(h.serialized_size(), 7);
    }
}
