use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{ForestError, Result};

pub const HASH_LENGTH: usize = 32;

/// Space holding the canonical, connected forest.
pub const CANONICAL_SPACE: SpaceId = 0;

/// Namespace id grouping one nested-interval tree.
pub type SpaceId = u64;

/// Position of a chain slot inside the canonical space.
pub type ChainId = u64;

// --- NewTypes ---

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash(pub [u8; HASH_LENGTH]);

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(self.0))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        if bytes.len() != HASH_LENGTH {
            return Err(serde::de::Error::custom("Invalid hash length"));
        }
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(&bytes);
        Ok(Hash(arr))
    }
}

impl Hash {
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; HASH_LENGTH];
        let len = bytes.len().min(HASH_LENGTH);
        arr[..len].copy_from_slice(&bytes[..len]);
        Hash(arr)
    }

    /// The all-zero hash a genesis header points back to.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }
}

/// Opaque identity of a stored block row.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// --- Nested interval coordinates ---

/// Closed `[left, right]` range of chain slots occupied by a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub left: u64,
    pub right: u64,
}

impl Span {
    /// The span every freshly admitted space root starts with.
    pub const LEAF: Span = Span { left: 0, right: 0 };

    pub fn new(left: u64, right: u64) -> Result<Self> {
        if left > right {
            return Err(ForestError::InvariantViolation(format!(
                "span_left {} > span_right {}",
                left, right
            )));
        }
        Ok(Self { left, right })
    }

    /// Number of slots covered, `right - left + 1`.
    pub fn width(&self) -> u64 {
        self.right - self.left + 1
    }

    pub fn is_point(&self) -> bool {
        self.left == self.right
    }

    /// Closed-interval containment.
    pub fn contains(&self, other: &Span) -> bool {
        self.left <= other.left && other.right <= self.right
    }

    pub fn covers(&self, slot: u64) -> bool {
        self.left <= slot && slot <= self.right
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.left <= other.right && other.left <= self.right
    }

    pub fn shifted(&self, offset: u64) -> Span {
        Span {
            left: self.left + offset,
            right: self.right + offset,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.left, self.right)
    }
}

/// Full placement of a node: space, depth and span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub space: SpaceId,
    pub depth: u64,
    pub span: Span,
}

// --- Domain Structs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Admitted as the root of its own space, ancestry not yet connected.
    PendingOrphan,
    /// Attached under its parent, not yet verified.
    Orphan,
    /// Chain work rolled up into the chain table.
    Verified,
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockStatus::PendingOrphan => "pending-orphan",
            BlockStatus::Orphan => "orphan",
            BlockStatus::Verified => "verified",
        };
        write!(f, "{}", s)
    }
}

/// The slice of a block header the forest cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: Hash,
    pub prev_hash: Hash,
    /// Compact difficulty target, opaque to the forest itself.
    pub bits: u32,
    pub timestamp: DateTime<Utc>,
}

/// One persisted row per block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockNode {
    pub id: NodeId,
    pub hash: Hash,
    pub prev_hash: Hash,
    pub space: SpaceId,
    pub depth: u64,
    pub span: Span,
    pub status: BlockStatus,
    pub bits: u32,
    pub created_at: DateTime<Utc>,
}

impl BlockNode {
    /// A freshly admitted block: root of its own space with a leaf span.
    pub fn pending(id: NodeId, space: SpaceId, header: &BlockHeader) -> Self {
        Self {
            id,
            hash: header.hash,
            prev_hash: header.prev_hash,
            space,
            depth: 0,
            span: Span::LEAF,
            status: BlockStatus::PendingOrphan,
            bits: header.bits,
            created_at: header.timestamp,
        }
    }

    pub fn position(&self) -> Position {
        Position {
            space: self.space,
            depth: self.depth,
            span: self.span,
        }
    }

    pub fn is_space_root(&self) -> bool {
        self.depth == 0
    }
}

/// Cumulative work of the branch ending at one chain slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainInfo {
    pub work: BigUint,
    /// Depth of the deepest verified block on this chain.
    pub depth: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_rejects_inverted_bounds() {
        assert!(Span::new(3, 2).is_err());
        let span = Span::new(2, 5).unwrap();
        assert_eq!(span.width(), 4);
        assert!(!span.is_point());
    }

    #[test]
    fn test_span_containment() {
        let outer = Span { left: 0, right: 4 };
        let inner = Span { left: 2, right: 3 };
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains(&outer));
        assert!(inner.overlaps(&Span { left: 3, right: 7 }));
        assert!(!inner.overlaps(&Span { left: 4, right: 7 }));
        assert_eq!(inner.shifted(5), Span { left: 7, right: 8 });
    }

    #[test]
    fn test_hash_serde_roundtrip_through_json() {
        let hash = Hash([7u8; HASH_LENGTH]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "07".repeat(HASH_LENGTH)));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
        assert!(Hash::default().is_null());
    }
}
