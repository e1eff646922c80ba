//! Row tiles over one (batch, head) slice, with masked load and store
//!
//! A tile is a contiguous run of sequence rows. Host buffers for a tile are always
//! `width` rows tall; rows past the end of the sequence are zero-filled on load and
//! skipped on store, so every kernel can treat a boundary tile exactly like an
//! interior one.

/// A contiguous run of rows `[start, start + len)` padded to `width` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowTile {
    pub start: usize,
    /// Valid rows, `<= width`
    pub len: usize,
    pub width: usize,
}

impl RowTile {
    pub fn new(index: usize, width: usize, seq_len: usize) -> Self {
        let start = index * width;
        let len = seq_len.saturating_sub(start).min(width);
        Self { start, len, width }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute index of the last valid row.
    pub fn last_row(&self) -> Option<usize> {
        self.end().checked_sub(1).filter(|_| !self.is_empty())
    }
}

pub(crate) fn num_tiles(seq_len: usize, width: usize) -> usize {
    seq_len.div_ceil(width)
}

/// Key tiles a query tile must visit.
///
/// Bidirectional: every key tile. Causal: only tiles whose first key can be at or
/// before the query tile's last row; every later tile is entirely masked.
pub(crate) fn key_tiles_for(
    q_tile: &RowTile,
    seq_len_k: usize,
    block_k: usize,
    causal: bool,
) -> std::ops::Range<usize> {
    let total = num_tiles(seq_len_k, block_k);
    if !causal {
        return 0..total;
    }
    match q_tile.last_row() {
        Some(last) => 0..total.min(last / block_k + 1),
        None => 0..0,
    }
}

/// Query tiles a key tile receives contributions from.
///
/// Bidirectional: every query tile. Causal: starts at the query tile holding row
/// `k_tile.start`; earlier query rows cannot see any key in this tile.
pub(crate) fn query_tiles_for(
    k_tile: &RowTile,
    seq_len_q: usize,
    block_q: usize,
    causal: bool,
) -> std::ops::Range<usize> {
    let total = num_tiles(seq_len_q, block_q);
    if k_tile.is_empty() {
        return 0..0;
    }
    if !causal {
        return 0..total;
    }
    (k_tile.start / block_q).min(total)..total
}

/// Masked load of a `[width, dim]` tile from a `[seq_len, dim]` row-major slice.
pub(crate) fn load_rows(src: &[f32], tile: &RowTile, dim: usize, dst: &mut [f64]) {
    debug_assert_eq!(dst.len(), tile.width * dim);
    let valid = tile.len * dim;
    let rows = &src[tile.start * dim..tile.end() * dim];
    for (d, &s) in dst[..valid].iter_mut().zip(rows) {
        *d = f64::from(s);
    }
    dst[valid..].fill(0.0);
}

/// Masked load of one scalar per row (the LSE statistic). Padded rows get `fill`.
pub(crate) fn load_scalars(src: &[f32], tile: &RowTile, fill: f64, dst: &mut [f64]) {
    debug_assert_eq!(dst.len(), tile.width);
    for (d, &s) in dst[..tile.len].iter_mut().zip(&src[tile.start..tile.end()]) {
        *d = f64::from(s);
    }
    dst[tile.len..].fill(fill);
}

/// Masked store: narrow the tile's valid rows into `dst`, which is exactly the
/// task's `[len, dim]` output region.
pub(crate) fn store_rows(src: &[f64], tile: &RowTile, dim: usize, dst: &mut [f32]) {
    debug_assert_eq!(dst.len(), tile.len * dim);
    for (d, &s) in dst.iter_mut().zip(&src[..tile.len * dim]) {
        *d = s as f32;
    }
}
