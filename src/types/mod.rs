#![forbid(unsafe_code)]
//! Identifier newtypes shared by every storage layer.

use std::fmt;

pub use crate::error::{GraphError, Result};

/// Stable node identifier, unique for the lifetime of a graph and never reused.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);

/// Identifier assigned by the persistent string table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct StrId(pub u32);

/// Position of a node label inside the [`crate::storage::LayoutRegistry`].
///
/// Unlike [`StrId`] this is not persisted; it only keeps [`crate::storage::NodeHandle`]
/// small and `Copy`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LabelId(pub u32);

/// Edge direction as seen from the node owning an adjacency block.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Direction {
    /// Edge leaves the owning node.
    Out,
    /// Edge arrives at the owning node.
    In,
}

const DIR_OUT: u8 = 0;
const DIR_IN: u8 = 1;

impl Direction {
    /// Returns the opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            Direction::Out => Direction::In,
            Direction::In => Direction::Out,
        }
    }

    /// Encodes the direction as a single byte.
    pub fn into_u8(self) -> u8 {
        match self {
            Direction::Out => DIR_OUT,
            Direction::In => DIR_IN,
        }
    }

    /// Decodes a direction byte written by [`Direction::into_u8`].
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            DIR_OUT => Some(Direction::Out),
            DIR_IN => Some(Direction::In),
            _ => None,
        }
    }

    /// Short name used in log fields and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl From<u32> for StrId {
    fn from(value: u32) -> Self {
        StrId(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_byte_roundtrip() {
        for dir in [Direction::Out, Direction::In] {
            assert_eq!(Direction::from_u8(dir.into_u8()), Some(dir));
            assert_eq!(dir.reverse().reverse(), dir);
        }
        assert_eq!(Direction::from_u8(7), None);
    }
}
