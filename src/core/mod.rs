//! Core chain types moved by the sync pool
//!
//! This module intentionally stays small: block storage, transaction
//! semantics and commit/PoW verification belong to the rest of the node,
//! not to this crate.

pub mod block;

pub use block::{Block, BlockHeader};

use std::fmt;
use std::ops::{Add, Sub};

/// A block height. Newtype over `u64` so request/response plumbing can't
/// accidentally mix heights up with in-flight counts or byte sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Height(pub u64);

impl Height {
    pub const ZERO: Height = Height(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for Height {
    type Output = Height;
    fn add(self, rhs: u64) -> Height {
        Height(self.0 + rhs)
    }
}

impl Sub<Height> for Height {
    type Output = i64;
    fn sub(self, rhs: Height) -> i64 {
        self.0 as i64 - rhs.0 as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_add_and_sub() {
        let h = Height(10);
        assert_eq!((h + 5).get(), 15);
        assert_eq!(Height(10) - Height(4), 6);
        assert_eq!(Height(4) - Height(10), -6);
    }
}
