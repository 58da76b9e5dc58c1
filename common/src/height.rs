use std::fmt;
use std::ops::{Add, Sub};

/// A block height, counting the genesis block as height zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct BlockHeight(u32);

impl BlockHeight {
    pub fn new(height: u32) -> Self {
        BlockHeight(height)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u32> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u32) -> BlockHeight {
        BlockHeight(self.0 + rhs)
    }
}

impl Sub<u32> for BlockHeight {
    type Output = BlockHeight;
    fn sub(self, rhs: u32) -> BlockHeight {
        BlockHeight(self.0 - rhs)
    }
}
