//! CPU attention kernels
//!
//! `flash` implements the op traits on `CpuClient`. The tiled forward and the
//! two-kernel backward work on host slices, one rayon task per output row tile.

pub mod flash;

mod flash_bwd;
mod flash_fwd;
mod gemm;
mod mask;
mod stats;
mod tile;

use crate::config::TileConfig;
use crate::ops::validate::AttentionShape;

/// Per-launch constants shared by every task of a forward or backward call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KernelParams {
    pub seq_len_q: usize,
    pub seq_len_k: usize,
    pub head_dim: usize,
    pub scale: f64,
    pub causal: bool,
    pub block_q: usize,
    pub block_k: usize,
}

impl KernelParams {
    pub fn new(shape: &AttentionShape, tiles: &TileConfig, causal: bool) -> Self {
        Self {
            seq_len_q: shape.seq_len_q,
            seq_len_k: shape.seq_len_k,
            head_dim: shape.head_dim,
            scale: shape.scale(),
            causal,
            block_q: tiles.block_q,
            block_k: tiles.block_k,
        }
    }

    /// Elements in one (batch, head) slice of a query-side tensor.
    pub fn q_head_len(&self) -> usize {
        self.seq_len_q * self.head_dim
    }

    /// Elements in one (batch, head) slice of a key-side tensor.
    pub fn kv_head_len(&self) -> usize {
        self.seq_len_k * self.head_dim
    }

    /// `[block_q, head_dim]` buffer length.
    pub fn q_tile_len(&self) -> usize {
        self.block_q * self.head_dim
    }

    /// `[block_k, head_dim]` buffer length.
    pub fn kv_tile_len(&self) -> usize {
        self.block_k * self.head_dim
    }
}

/// Slice `bh`-th `[len]` chunk out of a flattened `[B * H, len]` buffer.
#[inline]
pub(crate) fn head_slice(data: &[f32], bh: usize, len: usize) -> &[f32] {
    &data[bh * len..(bh + 1) * len]
}
