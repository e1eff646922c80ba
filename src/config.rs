//! Tile configuration for the blockwise attention kernels

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Row-tile widths used by the forward and backward kernels.
///
/// Results are independent of the choice up to floating-point rounding; the
/// widths only change how work is split across tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    /// Query rows per tile. The forward and dQ kernels run one task per query tile.
    pub block_q: usize,
    /// Key/value rows per tile. The dK/dV kernel runs one task per key tile.
    pub block_k: usize,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            block_q: 64,
            block_k: 64,
        }
    }
}

impl TileConfig {
    /// Same width on both axes.
    pub fn square(block: usize) -> Self {
        Self {
            block_q: block,
            block_k: block,
        }
    }

    pub fn with_block_q(mut self, block_q: usize) -> Self {
        self.block_q = block_q;
        self
    }

    pub fn with_block_k(mut self, block_k: usize) -> Self {
        self.block_k = block_k;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_q == 0 {
            return Err(Error::InvalidArgument {
                arg: "block_q",
                reason: "tile width must be at least 1".into(),
            });
        }
        if self.block_k == 0 {
            return Err(Error::InvalidArgument {
                arg: "block_k",
                reason: "tile width must be at least 1".into(),
            });
        }
        Ok(())
    }
}
