//! Tiled attention forward producing the output and the per-row LSE statistic
//!
//! One task per (batch, head, query tile). Each task streams over the key tiles it
//! can see, keeping an online-softmax state per row, so the `[S_q, S_k]` weight
//! matrix never exists. The LSE written here is what the backward kernels decode.

use super::gemm::{matmul_nn_acc, matmul_nt};
use super::mask::TileMask;
use super::stats::OnlineSoftmax;
use super::tile::{RowTile, key_tiles_for, load_rows, store_rows};
use super::{KernelParams, head_slice};
use rayon::prelude::*;

/// Host forward over flattened `[B * H, S, D]` slices.
///
/// Returns `(output [B * H * S_q * D], lse [B * H * S_q])`, both F32.
pub(super) fn flash_fwd_host(
    q: &[f32],
    k: &[f32],
    v: &[f32],
    num_slices: usize,
    params: &KernelParams,
) -> (Vec<f32>, Vec<f32>) {
    let d = params.head_dim;
    let q_head = params.q_head_len();
    let kv_head = params.kv_head_len();

    let mut output = vec![0.0f32; num_slices * q_head];
    let mut lse = vec![0.0f32; num_slices * params.seq_len_q];
    if q_head == 0 {
        return (output, lse);
    }

    output
        .par_chunks_mut(q_head)
        .zip(lse.par_chunks_mut(params.seq_len_q))
        .enumerate()
        .for_each(|(bh, (out_head, lse_head))| {
            let q_h = head_slice(q, bh, q_head);
            let k_h = head_slice(k, bh, kv_head);
            let v_h = head_slice(v, bh, kv_head);

            out_head
                .par_chunks_mut(params.block_q * d)
                .zip(lse_head.par_chunks_mut(params.block_q))
                .enumerate()
                .for_each(|(t, (out_tile, lse_tile))| {
                    let q_tile = RowTile::new(t, params.block_q, params.seq_len_q);
                    forward_tile(q_h, k_h, v_h, &q_tile, params, out_tile, lse_tile);
                });
        });

    (output, lse)
}

fn forward_tile(
    q_h: &[f32],
    k_h: &[f32],
    v_h: &[f32],
    q_tile: &RowTile,
    params: &KernelParams,
    out: &mut [f32],
    lse_out: &mut [f32],
) {
    let (bq, bk, d) = (params.block_q, params.block_k, params.head_dim);

    let mut q = vec![0.0f64; bq * d];
    let mut k = vec![0.0f64; bk * d];
    let mut v = vec![0.0f64; bk * d];
    let mut s = vec![0.0f64; bq * bk];
    let mut acc = vec![0.0f64; bq * d];
    let mut rows = vec![OnlineSoftmax::default(); bq];

    load_rows(q_h, q_tile, d, &mut q);

    for kt in key_tiles_for(q_tile, params.seq_len_k, bk, params.causal) {
        let k_tile = RowTile::new(kt, bk, params.seq_len_k);
        let mask = TileMask::new(*q_tile, k_tile, params.causal);
        if mask.is_empty() {
            continue;
        }

        load_rows(k_h, &k_tile, d, &mut k);
        load_rows(v_h, &k_tile, d, &mut v);

        matmul_nt(&q, &k, bq, bk, d, &mut s);
        s.iter_mut().for_each(|x| *x *= params.scale);
        mask.apply(&mut s);

        // s becomes unnormalized weights; rescale what each row accumulated so far
        for ((row, s_row), acc_row) in rows
            .iter_mut()
            .zip(s.chunks_exact_mut(bk))
            .zip(acc.chunks_exact_mut(d))
        {
            let rescale = row.update(s_row);
            if rescale != 1.0 {
                acc_row.iter_mut().for_each(|x| *x *= rescale);
            }
        }

        matmul_nn_acc(&s, &v, bq, bk, d, 1.0, &mut acc);
    }

    for (row, acc_row) in rows.iter().zip(acc.chunks_exact_mut(d)) {
        let sum = row.sum();
        if sum > 0.0 {
            let inv = sum.recip();
            acc_row.iter_mut().for_each(|x| *x *= inv);
        }
    }

    store_rows(&acc, q_tile, d, out);
    for (l, row) in lse_out.iter_mut().zip(&rows) {
        *l = row.lse() as f32;
    }
}
