//! Boundary and causal masking for one (query tile, key tile) pair
//!
//! The mask is a pure predicate over tile coordinates. It is applied to a whole
//! score tile in one elementwise pass: excluded entries become `-inf`, so their
//! reconstructed weight `exp(-inf - lse)` is exactly zero.

use super::tile::RowTile;

#[derive(Debug, Clone, Copy)]
pub(crate) struct TileMask {
    q: RowTile,
    k: RowTile,
    causal: bool,
}

impl TileMask {
    pub fn new(q: RowTile, k: RowTile, causal: bool) -> Self {
        Self { q, k, causal }
    }

    /// Whether query row `r` may attend to key column `c` (tile-local coordinates).
    ///
    /// Causal ties are allowed: a position attends to itself.
    #[inline]
    pub fn allows(&self, r: usize, c: usize) -> bool {
        let in_bounds = r < self.q.len && c < self.k.len;
        let visible = !self.causal || self.q.start + r >= self.k.start + c;
        in_bounds && visible
    }

    /// Force every excluded score in a `[q.width, k.width]` tile to `-inf`.
    pub fn apply(&self, scores: &mut [f64]) {
        debug_assert_eq!(scores.len(), self.q.width * self.k.width);
        let width = self.k.width;
        for (idx, s) in scores.iter_mut().enumerate() {
            let keep = self.allows(idx / width, idx % width);
            *s = if keep { *s } else { f64::NEG_INFINITY };
        }
    }

    /// True when no entry survives; such pairs never need to be visited.
    pub fn is_empty(&self) -> bool {
        if self.q.is_empty() || self.k.is_empty() {
            return true;
        }
        // The most permissive entry is the last query row against the first key.
        self.causal && self.q.end() <= self.k.start
    }
}
