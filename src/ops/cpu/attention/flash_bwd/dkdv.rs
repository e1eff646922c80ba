//! Column-gradient kernel: dK and dV for one key/value tile
//!
//! A key row is read by many query tiles, so ownership goes by key tile instead:
//! the task pulls in every query tile that can see it and sums their
//! contributions into private accumulators. No other task touches these rows.

use super::super::KernelParams;
use super::super::gemm::{matmul_nt, matmul_tn_acc};
use super::super::mask::TileMask;
use super::super::stats::{reconstruct_tile, softmax_grad_tile, tile_delta};
use super::super::tile::{RowTile, load_rows, load_scalars, query_tiles_for, store_rows};
use super::BackwardInputs;

pub(super) fn dkdv_tile(
    head: &BackwardInputs<'_>,
    k_tile: &RowTile,
    params: &KernelParams,
    dk_out: &mut [f32],
    dv_out: &mut [f32],
) {
    if k_tile.is_empty() {
        return;
    }
    let (bq, bk, d) = (params.block_q, params.block_k, params.head_dim);

    let mut k = vec![0.0f64; bk * d];
    let mut v = vec![0.0f64; bk * d];
    load_rows(head.k, k_tile, d, &mut k);
    load_rows(head.v, k_tile, d, &mut v);

    let mut dk = vec![0.0f64; bk * d];
    let mut dv = vec![0.0f64; bk * d];

    let mut q = vec![0.0f64; bq * d];
    let mut o = vec![0.0f64; bq * d];
    let mut dout = vec![0.0f64; bq * d];
    let mut lse = vec![0.0f64; bq];
    let mut delta = vec![0.0f64; bq];
    let mut p = vec![0.0f64; bq * bk];
    let mut ds = vec![0.0f64; bq * bk];

    for qt in query_tiles_for(k_tile, params.seq_len_q, bq, params.causal) {
        let q_tile = RowTile::new(qt, bq, params.seq_len_q);
        let mask = TileMask::new(q_tile, *k_tile, params.causal);

        load_rows(head.q, &q_tile, d, &mut q);
        load_rows(head.output, &q_tile, d, &mut o);
        load_rows(head.dout, &q_tile, d, &mut dout);
        load_scalars(head.lse, &q_tile, 0.0, &mut lse);

        matmul_nt(&q, &k, bq, bk, d, &mut p);
        p.iter_mut().for_each(|x| *x *= params.scale);
        mask.apply(&mut p);
        reconstruct_tile(&mut p, &lse, bk);

        // dV += Pᵀ dO
        matmul_tn_acc(&p, &dout, bq, bk, d, 1.0, &mut dv);

        // Same rows, same inputs: bit-identical to the delta the dQ task used.
        tile_delta(&dout, &o, d, &mut delta);
        matmul_nt(&dout, &v, bq, bk, d, &mut ds);
        softmax_grad_tile(&p, &mut ds, &delta, bk);

        // dK += dSᵀ Q / √D
        matmul_tn_acc(&ds, &q, bq, bk, d, params.scale, &mut dk);
    }

    store_rows(&dk, k_tile, d, dk_out);
    store_rows(&dv, k_tile, d, dv_out);
}
