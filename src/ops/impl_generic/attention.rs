//! Generic dense attention implementation
//!
//! Full-matrix attention composed from numr autograd primitives: matmul, softmax,
//! add, mul_scalar, transpose. Same on all backends, differentiated by numr's
//! autograd. It materializes `[B, H, S_q, S_k]`, which makes it the reference the
//! blockwise kernels are validated against rather than a training path.

use crate::error::{Error, Result};
use numr::autograd::{Var, var_add, var_matmul, var_mul_scalar, var_softmax, var_transpose};
use numr::dtype::DType;
use numr::ops::ScalarOps;
use numr::runtime::{Runtime, RuntimeClient};
use numr::tensor::Tensor;

/// Additive causal mask `[1, 1, S_q, S_k]`: 0 where `j <= i`, -inf elsewhere.
pub fn causal_mask<R>(seq_len_q: usize, seq_len_k: usize, device: &R::Device) -> Tensor<R>
where
    R: Runtime<DType = DType>,
{
    let mut mask_data = vec![0.0f32; seq_len_q * seq_len_k];
    for i in 0..seq_len_q {
        for j in (i + 1)..seq_len_k {
            mask_data[i * seq_len_k + j] = f32::NEG_INFINITY;
        }
    }
    Tensor::<R>::from_slice(&mask_data, &[1, 1, seq_len_q, seq_len_k], device)
}

/// Multi-head attention: softmax((Q @ K^T) / sqrt(d) + mask) @ V
///
/// All inputs/outputs are `Var<R>` for autograd support.
pub fn multi_head_attention_impl<R, C>(
    client: &C,
    q: &Var<R>,
    k: &Var<R>,
    v: &Var<R>,
    mask: Option<&Var<R>>,
) -> Result<Var<R>>
where
    R: Runtime,
    C: RuntimeClient<R> + ScalarOps<R>,
    R::Client: ScalarOps<R>,
{
    let q_shape = q.tensor().shape().to_vec();
    let k_shape = k.tensor().shape().to_vec();
    let v_shape = v.tensor().shape().to_vec();

    if q_shape.len() != 4 {
        return Err(Error::ShapeMismatch {
            arg: "q",
            expected: vec![0; 4],
            got: q_shape,
        });
    }
    if k_shape.len() != 4 {
        return Err(Error::ShapeMismatch {
            arg: "k",
            expected: vec![0; 4],
            got: k_shape,
        });
    }
    // B, H, D must match across q, k
    if q_shape[0] != k_shape[0] || q_shape[1] != k_shape[1] || q_shape[3] != k_shape[3] {
        return Err(Error::ShapeMismatch {
            arg: "k",
            expected: vec![q_shape[0], q_shape[1], k_shape[2], q_shape[3]],
            got: k_shape,
        });
    }
    if k_shape != v_shape {
        return Err(Error::ShapeMismatch {
            arg: "v",
            expected: k_shape,
            got: v_shape,
        });
    }

    let head_dim = q_shape[3];
    let scale = (head_dim as f64).sqrt().recip();

    // Q @ K^T → [B, H, S_q, S_k]
    let k_t = var_transpose(k).map_err(Error::Numr)?;
    let scores = var_matmul(q, &k_t, client).map_err(Error::Numr)?;

    // Scale by 1/sqrt(d)
    let scores = var_mul_scalar(&scores, scale, client).map_err(Error::Numr)?;

    let scores = match mask {
        Some(m) => var_add(&scores, m, client).map_err(Error::Numr)?,
        None => scores,
    };

    // Softmax over last dim
    let weights = var_softmax(&scores, -1, client).map_err(Error::Numr)?;

    // Weights @ V → [B, H, S_q, D]
    var_matmul(&weights, v, client).map_err(Error::Numr)
}

/// Scaled dot-product attention with an explicit scale and built-in causal mask.
///
/// - `q`: `[B, H, S_q, D]`
/// - `k`, `v`: `[B, H, S_k, D]`
/// - Output: `[B, H, S_q, D]`
pub fn scaled_dot_product_attention_impl<R, C>(
    client: &C,
    q: &Var<R>,
    k: &Var<R>,
    v: &Var<R>,
    scale: f64,
    causal: bool,
) -> Result<Var<R>>
where
    R: Runtime<DType = DType>,
    C: RuntimeClient<R> + ScalarOps<R>,
    R::Client: ScalarOps<R>,
{
    let q_shape = q.tensor().shape().to_vec();
    let k_shape = k.tensor().shape().to_vec();

    if q_shape.len() != 4 || k_shape.len() != 4 {
        return Err(Error::InvalidArgument {
            arg: "q/k/v",
            reason: "expected 4D tensors [B, H, S, D]".into(),
        });
    }

    let k_t = var_transpose(k).map_err(Error::Numr)?;
    let scores = var_matmul(q, &k_t, client).map_err(Error::Numr)?;
    let scores = var_mul_scalar(&scores, scale, client).map_err(Error::Numr)?;

    let scores = if causal {
        let mask = Var::new(
            causal_mask::<R>(q_shape[2], k_shape[2], q.tensor().device()),
            false,
        );
        var_add(&scores, &mask, client).map_err(Error::Numr)?
    } else {
        scores
    };

    let weights = var_softmax(&scores, -1, client).map_err(Error::Numr)?;
    var_matmul(&weights, v, client).map_err(Error::Numr)
}
