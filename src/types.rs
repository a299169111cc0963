//! Common type definitions shared across the daemon.

use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};

/// The height and hash of a block, used to remember when an address first
/// became relevant to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
    /// Block height.
    pub height: u32,

    /// Block hash.
    pub hash: BlockHash,
}

impl BlockStamp {
    /// Create a block stamp for the given height with an all-zero hash.
    ///
    /// Used when only the height is known, e.g. the worst-case guess for
    /// an imported key that carries no history.
    pub fn at_height(height: u32) -> Self {
        use bitcoin::hashes::Hash;
        Self {
            height,
            hash: BlockHash::all_zeros(),
        }
    }
}

impl std::fmt::Display for BlockStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.height, self.hash)
    }
}
