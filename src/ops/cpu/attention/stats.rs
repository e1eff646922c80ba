//! Row statistic codec: log-sum-exp encoding and weight reconstruction
//!
//! A softmax row is fully described by its scores plus one scalar,
//! `lse = m + ln(l)` where `m` is any stabilizing max and `l = Σ exp(s - m)`.
//! Because the shift is folded into `lse`, `exp(s - lse)` reproduces the row's
//! weights exactly no matter which `m` the encoder used along the way.
//!
//! Also home to the row bias `delta_i = dO_i · O_i`. The softmax backward needs
//! `Σ_j dP_ij P_ij`; since `dP_ij = dO_i · V_j` and `O_i = Σ_j P_ij V_j`, that sum
//! equals `dO_i · O_i`, which costs O(D) per row instead of a pass over P.

use super::gemm::dot;

/// Streaming log-sum-exp encoder for one row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OnlineSoftmax {
    max: f64,
    sum: f64,
}

impl Default for OnlineSoftmax {
    fn default() -> Self {
        Self {
            max: f64::NEG_INFINITY,
            sum: 0.0,
        }
    }
}

impl OnlineSoftmax {
    /// Fold a block of scores in, overwriting them with `exp(s - new_max)`.
    ///
    /// Returns the factor previously accumulated state (including any running
    /// weighted sum the caller keeps) must be multiplied by.
    pub fn update(&mut self, scores: &mut [f64]) -> f64 {
        let block_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let new_max = self.max.max(block_max);
        if new_max == f64::NEG_INFINITY {
            // Nothing visible yet; leave the row untouched.
            scores.fill(0.0);
            return 1.0;
        }

        let rescale = (self.max - new_max).exp();
        let mut block_sum = 0.0;
        for s in scores.iter_mut() {
            *s = (*s - new_max).exp();
            block_sum += *s;
        }

        self.sum = self.sum * rescale + block_sum;
        self.max = new_max;
        rescale
    }

    /// Normalizer `l`; multiply accumulated outputs by its reciprocal.
    pub fn sum(&self) -> f64 {
        self.sum
    }

    /// Encoded statistic `m + ln(l)`; `-inf` for a row that saw no visible score.
    pub fn lse(&self) -> f64 {
        if self.sum == 0.0 {
            f64::NEG_INFINITY
        } else {
            self.max + self.sum.ln()
        }
    }
}

/// One-shot log-sum-exp of a row.
#[cfg(test)]
pub(crate) fn logsumexp(scores: &[f64]) -> f64 {
    let mut row = scores.to_vec();
    let mut enc = OnlineSoftmax::default();
    enc.update(&mut row);
    enc.lse()
}

/// `P_ij = exp(S_ij - LSE_i)`.
#[inline]
pub(crate) fn reconstruct_weight(score: f64, lse: f64) -> f64 {
    (score - lse).exp()
}

/// In place: turn a `[lse.len(), width]` score tile into its weight tile.
pub(crate) fn reconstruct_tile(scores: &mut [f64], lse: &[f64], width: usize) {
    debug_assert_eq!(scores.len(), lse.len() * width);
    for (row, &l) in scores.chunks_exact_mut(width).zip(lse) {
        debug_assert!(l.is_finite(), "row statistic must be finite, got {l}");
        for s in row.iter_mut() {
            *s = reconstruct_weight(*s, l);
        }
    }
}

/// `delta_i = Σ_d dO_id · O_id`.
#[inline]
pub(crate) fn row_delta(dout_row: &[f64], out_row: &[f64]) -> f64 {
    dot(dout_row, out_row)
}

/// Row bias for every row of a `[delta.len(), dim]` tile. Padded rows are zero
/// on load, so their delta is zero too.
pub(crate) fn tile_delta(dout: &[f64], out: &[f64], dim: usize, delta: &mut [f64]) {
    debug_assert_eq!(dout.len(), delta.len() * dim);
    debug_assert_eq!(out.len(), delta.len() * dim);
    for ((d, dout_row), out_row) in delta
        .iter_mut()
        .zip(dout.chunks_exact(dim))
        .zip(out.chunks_exact(dim))
    {
        *d = row_delta(dout_row, out_row);
    }
}

/// In place: `dP` becomes `dS = P ⊙ (dP - delta[:, None])`.
pub(crate) fn softmax_grad_tile(p: &[f64], dp: &mut [f64], delta: &[f64], width: usize) {
    debug_assert_eq!(p.len(), dp.len());
    debug_assert_eq!(dp.len(), delta.len() * width);
    for ((dp_row, p_row), &dl) in dp.chunks_exact_mut(width).zip(p.chunks_exact(width)).zip(delta)
    {
        for (g, &w) in dp_row.iter_mut().zip(p_row) {
            *g = w * (*g - dl);
        }
    }
}
