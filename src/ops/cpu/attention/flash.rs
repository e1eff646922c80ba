//! CPU implementation of AttentionOps and FlashAttentionOps
//!
//! AttentionOps delegates to impl_generic (Var-based autograd, dense).
//! FlashAttentionOps runs the tiled host kernels: inputs are widened to F32 host
//! slices, kernels accumulate in f64, results come back as F32 tensors and are
//! cast to the caller's storage dtype.

use super::KernelParams;
use super::flash_bwd::{BackwardInputs, flash_bwd_host};
use super::flash_fwd::flash_fwd_host;
use crate::config::TileConfig;
use crate::error::{Error, Result};
use crate::ops::impl_generic::attention::multi_head_attention_impl;
use crate::ops::traits::{AttentionOps, FlashAttentionOps};
use crate::ops::validate::AttentionShape;
use numr::autograd::Var;
use numr::dtype::DType;
use numr::ops::TypeConversionOps;
use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
use numr::tensor::Tensor;

impl AttentionOps<CpuRuntime> for CpuClient {
    fn multi_head_attention(
        &self,
        q: &Var<CpuRuntime>,
        k: &Var<CpuRuntime>,
        v: &Var<CpuRuntime>,
        mask: Option<&Var<CpuRuntime>>,
    ) -> Result<Var<CpuRuntime>> {
        multi_head_attention_impl(self, q, k, v, mask)
    }
}

/// Contiguous F32 host copy of a tensor, widening F16/BF16 storage.
fn host_f32(client: &CpuClient, t: &Tensor<CpuRuntime>) -> Result<Vec<f32>> {
    if t.dtype() == DType::F32 {
        return Ok(t.contiguous().to_vec::<f32>());
    }
    let widened = client.cast(t, DType::F32).map_err(Error::Numr)?;
    Ok(widened.contiguous().to_vec::<f32>())
}

/// Wrap an F32 host buffer and narrow it to the storage dtype.
fn to_storage(
    client: &CpuClient,
    data: &[f32],
    shape: &[usize],
    dtype: DType,
    device: &CpuDevice,
) -> Result<Tensor<CpuRuntime>> {
    let t = Tensor::<CpuRuntime>::from_slice(data, shape, device);
    if dtype == DType::F32 {
        return Ok(t);
    }
    client.cast(&t, dtype).map_err(Error::Numr)
}

impl FlashAttentionOps<CpuRuntime> for CpuClient {
    fn flash_attention_fwd_with_tiles(
        &self,
        q: &Tensor<CpuRuntime>,
        k: &Tensor<CpuRuntime>,
        v: &Tensor<CpuRuntime>,
        causal: bool,
        tiles: &TileConfig,
    ) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
        tiles.validate()?;
        let shape = AttentionShape::for_forward(q, k, v)?;
        let params = KernelParams::new(&shape, tiles, causal);

        let _span = tracing::debug_span!(
            "flash_attention_fwd",
            batch = shape.batch,
            heads = shape.num_heads,
            seq_len_q = shape.seq_len_q,
            seq_len_k = shape.seq_len_k,
            head_dim = shape.head_dim,
            causal,
            block_q = tiles.block_q,
            block_k = tiles.block_k,
        )
        .entered();

        let q_data = host_f32(self, q)?;
        let k_data = host_f32(self, k)?;
        let v_data = host_f32(self, v)?;

        let (out, lse) = flash_fwd_host(&q_data, &k_data, &v_data, shape.num_slices(), &params);

        let device = q.device();
        let out = to_storage(self, &out, &shape.q_shape(), shape.dtype, device)?;
        let lse = Tensor::<CpuRuntime>::from_slice(&lse, &shape.lse_shape(), device);
        Ok((out, lse))
    }

    fn flash_attention_bwd_with_tiles(
        &self,
        dout: &Tensor<CpuRuntime>,
        q: &Tensor<CpuRuntime>,
        k: &Tensor<CpuRuntime>,
        v: &Tensor<CpuRuntime>,
        output: &Tensor<CpuRuntime>,
        lse: &Tensor<CpuRuntime>,
        causal: bool,
        tiles: &TileConfig,
    ) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
        tiles.validate()?;
        let shape = AttentionShape::for_backward(dout, q, k, v, output, lse)?;
        let params = KernelParams::new(&shape, tiles, causal);

        let _span = tracing::debug_span!(
            "flash_attention_bwd",
            batch = shape.batch,
            heads = shape.num_heads,
            seq_len_q = shape.seq_len_q,
            seq_len_k = shape.seq_len_k,
            head_dim = shape.head_dim,
            causal,
            block_q = tiles.block_q,
            block_k = tiles.block_k,
        )
        .entered();

        let q_data = host_f32(self, q)?;
        let k_data = host_f32(self, k)?;
        let v_data = host_f32(self, v)?;
        let out_data = host_f32(self, output)?;
        let dout_data = host_f32(self, dout)?;
        let lse_data = lse.contiguous().to_vec::<f32>();

        let inputs = BackwardInputs {
            q: &q_data,
            k: &k_data,
            v: &v_data,
            output: &out_data,
            dout: &dout_data,
            lse: &lse_data,
        };
        let grads = flash_bwd_host(&inputs, shape.num_slices(), &params);

        if shape.dtype != DType::F32 {
            tracing::debug!(dtype = ?shape.dtype, "narrowing gradients to storage dtype");
        }

        let device = q.device();
        let dq = to_storage(self, &grads.dq, &shape.q_shape(), shape.dtype, device)?;
        let dk = to_storage(self, &grads.dk, &shape.kv_shape(), shape.dtype, device)?;
        let dv = to_storage(self, &grads.dv, &shape.kv_shape(), shape.dtype, device)?;
        Ok((dq, dk, dv))
    }
}
