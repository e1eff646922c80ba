//! Recomputation-based blockwise attention backward
//!
//! Two kernels, two decompositions:
//!
//! ```text
//!   dQ     one task per (b, h, query tile)   loops over key tiles
//!   dK,dV  one task per (b, h, key tile)     loops over query tiles
//! ```
//!
//! Each gradient buffer is split with `par_chunks_mut` along exactly the axis its
//! kernel owns, so every task receives the only mutable view of its rows and the
//! two launches need no synchronization beyond rayon's join. Neither kernel ever
//! holds more than one `[block_q, block_k]` weight tile.

mod dkdv;
mod dq;

use super::tile::RowTile;
use super::{KernelParams, head_slice};
use rayon::prelude::*;

/// Read-only backward inputs, row-major.
///
/// The launcher holds the flattened `[B * H, S, D]` buffers; `head` narrows the
/// same view to one (batch, head) slice for the kernels.
#[derive(Clone, Copy)]
pub(in crate::ops::cpu) struct BackwardInputs<'a> {
    pub q: &'a [f32],
    pub k: &'a [f32],
    pub v: &'a [f32],
    pub output: &'a [f32],
    pub dout: &'a [f32],
    pub lse: &'a [f32],
}

impl<'a> BackwardInputs<'a> {
    fn head(&self, bh: usize, params: &KernelParams) -> Self {
        let q_len = params.q_head_len();
        let kv_len = params.kv_head_len();
        Self {
            q: head_slice(self.q, bh, q_len),
            k: head_slice(self.k, bh, kv_len),
            v: head_slice(self.v, bh, kv_len),
            output: head_slice(self.output, bh, q_len),
            dout: head_slice(self.dout, bh, q_len),
            lse: head_slice(self.lse, bh, params.seq_len_q),
        }
    }
}

/// Gradients as flattened F32 buffers in the input layouts.
pub(in crate::ops::cpu) struct HostGrads {
    pub dq: Vec<f32>,
    pub dk: Vec<f32>,
    pub dv: Vec<f32>,
}

/// Run both gradient kernels over every (batch, head) slice.
pub(in crate::ops::cpu) fn flash_bwd_host(
    inputs: &BackwardInputs<'_>,
    num_slices: usize,
    params: &KernelParams,
) -> HostGrads {
    let (dq, (dk, dv)) = rayon::join(
        || launch_dq(inputs, num_slices, params),
        || launch_dkdv(inputs, num_slices, params),
    );
    HostGrads { dq, dk, dv }
}

fn launch_dq(inputs: &BackwardInputs<'_>, num_slices: usize, params: &KernelParams) -> Vec<f32> {
    let q_head = params.q_head_len();
    let mut dq = vec![0.0f32; num_slices * q_head];
    if q_head == 0 {
        return dq;
    }

    tracing::trace!(
        tasks = num_slices * super::tile::num_tiles(params.seq_len_q, params.block_q),
        "launching dq kernel"
    );

    dq.par_chunks_mut(q_head)
        .enumerate()
        .for_each(|(bh, dq_head)| {
            let head = inputs.head(bh, params);
            dq_head
                .par_chunks_mut(params.q_tile_len())
                .enumerate()
                .for_each(|(t, dq_tile_out)| {
                    let q_tile = RowTile::new(t, params.block_q, params.seq_len_q);
                    dq::dq_tile(&head, &q_tile, params, dq_tile_out);
                });
        });
    dq
}

fn launch_dkdv(
    inputs: &BackwardInputs<'_>,
    num_slices: usize,
    params: &KernelParams,
) -> (Vec<f32>, Vec<f32>) {
    let kv_head = params.kv_head_len();
    let mut dk = vec![0.0f32; num_slices * kv_head];
    let mut dv = vec![0.0f32; num_slices * kv_head];
    if kv_head == 0 {
        return (dk, dv);
    }

    tracing::trace!(
        tasks = num_slices * super::tile::num_tiles(params.seq_len_k, params.block_k),
        "launching dk/dv kernel"
    );

    dk.par_chunks_mut(kv_head)
        .zip(dv.par_chunks_mut(kv_head))
        .enumerate()
        .for_each(|(bh, (dk_head, dv_head))| {
            let head = inputs.head(bh, params);
            dk_head
                .par_chunks_mut(params.kv_tile_len())
                .zip(dv_head.par_chunks_mut(params.kv_tile_len()))
                .enumerate()
                .for_each(|(t, (dk_tile_out, dv_tile_out))| {
                    let k_tile = RowTile::new(t, params.block_k, params.seq_len_k);
                    dkdv::dkdv_tile(&head, &k_tile, params, dk_tile_out, dv_tile_out);
                });
        });
    (dk, dv)
}

#[cfg(test)]
mod tests {
    use super::super::flash_fwd::flash_fwd_host;
    use super::*;

    fn params(
        s_q: usize,
        s_k: usize,
        d: usize,
        bq: usize,
        bk: usize,
        causal: bool,
    ) -> KernelParams {
        KernelParams {
            seq_len_q: s_q,
            seq_len_k: s_k,
            head_dim: d,
            scale: (d as f64).sqrt().recip(),
            causal,
            block_q: bq,
            block_k: bk,
        }
    }

    fn det(n: usize, phase: f32) -> Vec<f32> {
        (0..n).map(|i| (i as f32 * 0.23 + phase).sin() * 0.8).collect()
    }

    /// Dense single-head backward with the full weight matrix, f64 throughout.
    fn dense_bwd(
        q: &[f32],
        k: &[f32],
        v: &[f32],
        dout: &[f32],
        p: &KernelParams,
    ) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let (s_q, s_k, d) = (p.seq_len_q, p.seq_len_k, p.head_dim);
        let f = |x: &[f32], i: usize, c: usize| f64::from(x[i * d + c]);

        let mut w = vec![0.0f64; s_q * s_k];
        for i in 0..s_q {
            let row = &mut w[i * s_k..(i + 1) * s_k];
            for (j, wj) in row.iter_mut().enumerate() {
                *wj = if p.causal && j > i {
                    f64::NEG_INFINITY
                } else {
                    (0..d).map(|c| f(q, i, c) * f(k, j, c)).sum::<f64>() * p.scale
                };
            }
            let m = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            row.iter_mut().for_each(|x| *x = (*x - m).exp());
            let sum: f64 = row.iter().sum();
            row.iter_mut().for_each(|x| *x /= sum);
        }

        let mut dq = vec![0.0; s_q * d];
        let mut dk = vec![0.0; s_k * d];
        let mut dv = vec![0.0; s_k * d];
        for i in 0..s_q {
            let dp: Vec<f64> = (0..s_k)
                .map(|j| (0..d).map(|c| f(dout, i, c) * f(v, j, c)).sum())
                .collect();
            let pdp: f64 = (0..s_k).map(|j| w[i * s_k + j] * dp[j]).sum();
            for j in 0..s_k {
                let pij = w[i * s_k + j];
                let ds = pij * (dp[j] - pdp) * p.scale;
                for c in 0..d {
                    dq[i * d + c] += ds * f(k, j, c);
                    dk[j * d + c] += ds * f(q, i, c);
                    dv[j * d + c] += pij * f(dout, i, c);
                }
            }
        }
        (dq, dk, dv)
    }

    fn assert_close(got: &[f32], want: &[f64], what: &str) {
        assert_eq!(got.len(), want.len(), "{what}: length");
        for (i, (&g, &w)) in got.iter().zip(want).enumerate() {
            let tol = 1e-5 + 1e-4 * w.abs();
            assert!(
                (f64::from(g) - w).abs() <= tol,
                "{what}[{i}]: got {g}, want {w}"
            );
        }
    }

    fn run(p: &KernelParams) {
        let (s_q, s_k, d) = (p.seq_len_q, p.seq_len_k, p.head_dim);
        let q = det(s_q * d, 0.0);
        let k = det(s_k * d, 1.3);
        let v = det(s_k * d, 2.1);
        let dout = det(s_q * d, 0.7);
        let (output, lse) = flash_fwd_host(&q, &k, &v, 1, p);

        let inputs = BackwardInputs {
            q: &q,
            k: &k,
            v: &v,
            output: &output,
            dout: &dout,
            lse: &lse,
        };
        let grads = flash_bwd_host(&inputs, 1, p);
        let (dq, dk, dv) = dense_bwd(&q, &k, &v, &dout, p);

        assert_close(&grads.dq, &dq, "dq");
        assert_close(&grads.dk, &dk, "dk");
        assert_close(&grads.dv, &dv, "dv");
    }

    #[test]
    fn test_head_view_narrows_every_buffer() {
        // 2 slices, S_q = 3, S_k = 2, D = 2
        let p = params(3, 2, 2, 2, 2, false);
        let q: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let kv: Vec<f32> = (0..8).map(|i| 100.0 + i as f32).collect();
        let lse: Vec<f32> = (0..6).map(|i| -(i as f32)).collect();
        let inputs = BackwardInputs {
            q: &q,
            k: &kv,
            v: &kv,
            output: &q,
            dout: &q,
            lse: &lse,
        };

        let head = inputs.head(1, &p);
        assert_eq!(head.q, &q[6..12]);
        assert_eq!(head.output, &q[6..12]);
        assert_eq!(head.dout, &q[6..12]);
        assert_eq!(head.k, &kv[4..8]);
        assert_eq!(head.v, &kv[4..8]);
        assert_eq!(head.lse, &[-3.0f32, -4.0, -5.0][..]);
    }

    #[test]
    fn test_matches_dense_bidirectional() {
        run(&params(13, 13, 8, 4, 4, false));
    }

    #[test]
    fn test_matches_dense_causal() {
        run(&params(13, 13, 8, 4, 4, true));
    }

    #[test]
    fn test_matches_dense_uneven_tiles() {
        run(&params(10, 17, 4, 3, 5, false));
        run(&params(10, 17, 4, 5, 3, true));
    }

    #[test]
    fn test_single_tile_covers_everything() {
        run(&params(6, 9, 8, 64, 64, true));
    }

    #[test]
    fn test_causal_keys_past_last_query_get_zero() {
        // S_q < S_k with causal: keys 6.. are never visible
        let p = params(6, 12, 4, 4, 4, true);
        let q = det(6 * 4, 0.0);
        let k = det(12 * 4, 1.0);
        let v = det(12 * 4, 2.0);
        let dout = det(6 * 4, 3.0);
        let (output, lse) = flash_fwd_host(&q, &k, &v, 1, &p);
        let inputs = BackwardInputs {
            q: &q,
            k: &k,
            v: &v,
            output: &output,
            dout: &dout,
            lse: &lse,
        };
        let grads = flash_bwd_host(&inputs, 1, &p);
        assert!(grads.dk[6 * 4..].iter().all(|&x| x == 0.0));
        assert!(grads.dv[6 * 4..].iter().all(|&x| x == 0.0));
        assert!(grads.dv[..6 * 4].iter().any(|&x| x != 0.0));
    }
}
