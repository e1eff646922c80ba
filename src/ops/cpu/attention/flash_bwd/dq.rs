//! Row-gradient kernel: dQ for one query tile
//!
//! The task owns its query rows outright, so it visits every key tile those rows
//! can see, rebuilds the weight tile from the saved LSE, and writes its dQ rows
//! once at the end.

use super::super::KernelParams;
use super::super::gemm::{matmul_nn_acc, matmul_nt};
use super::super::mask::TileMask;
use super::super::stats::{reconstruct_tile, softmax_grad_tile, tile_delta};
use super::super::tile::{RowTile, key_tiles_for, load_rows, load_scalars, store_rows};
use super::BackwardInputs;

pub(super) fn dq_tile(
    head: &BackwardInputs<'_>,
    q_tile: &RowTile,
    params: &KernelParams,
    dq_out: &mut [f32],
) {
    if q_tile.is_empty() {
        return;
    }
    let (bq, bk, d) = (params.block_q, params.block_k, params.head_dim);

    let mut q = vec![0.0f64; bq * d];
    let mut o = vec![0.0f64; bq * d];
    let mut dout = vec![0.0f64; bq * d];
    let mut lse = vec![0.0f64; bq];
    load_rows(head.q, q_tile, d, &mut q);
    load_rows(head.output, q_tile, d, &mut o);
    load_rows(head.dout, q_tile, d, &mut dout);
    load_scalars(head.lse, q_tile, 0.0, &mut lse);

    let mut delta = vec![0.0f64; bq];
    tile_delta(&dout, &o, d, &mut delta);

    let mut acc = vec![0.0f64; bq * d];
    let mut k = vec![0.0f64; bk * d];
    let mut v = vec![0.0f64; bk * d];
    let mut p = vec![0.0f64; bq * bk];
    let mut ds = vec![0.0f64; bq * bk];

    for kt in key_tiles_for(q_tile, params.seq_len_k, bk, params.causal) {
        let k_tile = RowTile::new(kt, bk, params.seq_len_k);
        let mask = TileMask::new(*q_tile, k_tile, params.causal);

        load_rows(head.k, &k_tile, d, &mut k);
        load_rows(head.v, &k_tile, d, &mut v);

        // S = Q Kᵀ / √D, masked, then P = exp(S - LSE)
        matmul_nt(&q, &k, bq, bk, d, &mut p);
        p.iter_mut().for_each(|x| *x *= params.scale);
        mask.apply(&mut p);
        reconstruct_tile(&mut p, &lse, bk);

        // dS = P ⊙ (dO Vᵀ - delta)
        matmul_nt(&dout, &v, bq, bk, d, &mut ds);
        softmax_grad_tile(&p, &mut ds, &delta, bk);

        matmul_nn_acc(&ds, &k, bq, bk, d, params.scale, &mut acc);
    }

    store_rows(&acc, q_tile, d, dq_out);
}
