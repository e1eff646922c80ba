//! Boundary checks for the flash attention entry points
//!
//! Every shape and dtype condition is checked here, once per call, before any
//! tile work starts. Kernels downstream assume a validated [`AttentionShape`].

use crate::error::{Error, Result};
use numr::dtype::DType;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Validated problem geometry shared by forward and backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionShape {
    pub batch: usize,
    pub num_heads: usize,
    pub seq_len_q: usize,
    pub seq_len_k: usize,
    pub head_dim: usize,
    /// Storage dtype of Q/K/V/O/dO
    pub dtype: DType,
}

impl AttentionShape {
    /// Validate forward inputs: `q [B, H, S_q, D]`, `k`/`v` `[B, H, S_k, D]`.
    pub fn for_forward<R>(q: &Tensor<R>, k: &Tensor<R>, v: &Tensor<R>) -> Result<Self>
    where
        R: Runtime<DType = DType>,
    {
        let q_shape = rank4("q", q.shape())?;
        let k_shape = rank4("k", k.shape())?;
        let v_shape = rank4("v", v.shape())?;

        let [batch, num_heads, seq_len_q, head_dim] = q_shape;
        let seq_len_k = k_shape[2];

        expect_shape("k", &[batch, num_heads, seq_len_k, head_dim], &k_shape)?;
        expect_shape("v", &k_shape, &v_shape)?;

        if head_dim == 0 {
            return Err(Error::InvalidArgument {
                arg: "head_dim",
                reason: "head dimension must be at least 1".into(),
            });
        }
        if seq_len_k == 0 {
            return Err(Error::InvalidArgument {
                arg: "k",
                reason: "key sequence is empty; softmax over zero keys is undefined".into(),
            });
        }

        let dtype = storage_dtype("q", q.dtype())?;
        expect_dtype(dtype, k.dtype())?;
        expect_dtype(dtype, v.dtype())?;

        Ok(Self {
            batch,
            num_heads,
            seq_len_q,
            seq_len_k,
            head_dim,
            dtype,
        })
    }

    /// Validate backward inputs: forward checks plus `output`/`dout` matching Q
    /// and `lse` being F32 `[B, H, S_q]`.
    pub fn for_backward<R>(
        dout: &Tensor<R>,
        q: &Tensor<R>,
        k: &Tensor<R>,
        v: &Tensor<R>,
        output: &Tensor<R>,
        lse: &Tensor<R>,
    ) -> Result<Self>
    where
        R: Runtime<DType = DType>,
    {
        let shape = Self::for_forward(q, k, v)?;
        let q_shape = shape.q_shape();

        expect_shape("output", &q_shape, output.shape())?;
        expect_shape("dout", &q_shape, dout.shape())?;
        expect_shape("lse", &shape.lse_shape(), lse.shape())?;

        expect_dtype(shape.dtype, output.dtype())?;
        expect_dtype(shape.dtype, dout.dtype())?;
        expect_dtype(DType::F32, lse.dtype())?;

        Ok(shape)
    }

    pub fn q_shape(&self) -> [usize; 4] {
        [self.batch, self.num_heads, self.seq_len_q, self.head_dim]
    }

    pub fn kv_shape(&self) -> [usize; 4] {
        [self.batch, self.num_heads, self.seq_len_k, self.head_dim]
    }

    pub fn lse_shape(&self) -> [usize; 3] {
        [self.batch, self.num_heads, self.seq_len_q]
    }

    /// Number of independent (batch, head) slices.
    pub fn num_slices(&self) -> usize {
        self.batch * self.num_heads
    }

    /// Softmax temperature `1 / sqrt(D)`.
    pub fn scale(&self) -> f64 {
        (self.head_dim as f64).sqrt().recip()
    }
}

fn rank4(arg: &'static str, shape: &[usize]) -> Result<[usize; 4]> {
    match shape {
        &[b, h, s, d] => Ok([b, h, s, d]),
        _ => Err(Error::ShapeMismatch {
            arg,
            expected: vec![0; 4],
            got: shape.to_vec(),
        }),
    }
}

fn expect_shape(arg: &'static str, expected: &[usize], got: &[usize]) -> Result<()> {
    if expected != got {
        return Err(Error::ShapeMismatch {
            arg,
            expected: expected.to_vec(),
            got: got.to_vec(),
        });
    }
    Ok(())
}

fn expect_dtype(expected: DType, got: DType) -> Result<()> {
    if expected != got {
        return Err(Error::DTypeMismatch { expected, got });
    }
    Ok(())
}

fn storage_dtype(arg: &'static str, dtype: DType) -> Result<DType> {
    match dtype {
        DType::F32 | DType::F16 | DType::BF16 => Ok(dtype),
        other => Err(Error::UnsupportedDType { arg, dtype: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;
    use numr::runtime::cpu::CpuRuntime;

    fn zeros(shape: &[usize], device: &numr::runtime::cpu::CpuDevice) -> Tensor<CpuRuntime> {
        let n: usize = shape.iter().product();
        Tensor::<CpuRuntime>::from_slice(&vec![0.0f32; n], shape, device)
    }

    #[test]
    fn test_forward_shape_accepts_cross_attention() {
        let (_client, device) = cpu_setup();
        let q = zeros(&[2, 3, 5, 8], &device);
        let k = zeros(&[2, 3, 7, 8], &device);
        let v = zeros(&[2, 3, 7, 8], &device);

        let shape = AttentionShape::for_forward(&q, &k, &v).unwrap();
        assert_eq!(shape.q_shape(), [2, 3, 5, 8]);
        assert_eq!(shape.kv_shape(), [2, 3, 7, 8]);
        assert_eq!(shape.lse_shape(), [2, 3, 5]);
        assert_eq!(shape.num_slices(), 6);
        assert_eq!(shape.dtype, DType::F32);
    }

    #[test]
    fn test_head_dim_mismatch_rejected() {
        let (_client, device) = cpu_setup();
        let q = zeros(&[1, 2, 4, 8], &device);
        let k = zeros(&[1, 2, 4, 16], &device);
        let v = zeros(&[1, 2, 4, 16], &device);

        let err = AttentionShape::for_forward(&q, &k, &v).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { arg: "k", .. }));
    }

    #[test]
    fn test_batch_head_mismatch_rejected() {
        let (_client, device) = cpu_setup();
        let q = zeros(&[1, 2, 4, 8], &device);
        let k = zeros(&[1, 4, 4, 8], &device);
        let v = zeros(&[1, 4, 4, 8], &device);
        assert!(AttentionShape::for_forward(&q, &k, &v).is_err());
    }

    #[test]
    fn test_rank_rejected() {
        let (_client, device) = cpu_setup();
        let q = zeros(&[2, 4, 8], &device);
        let k = zeros(&[1, 2, 4, 8], &device);
        let v = zeros(&[1, 2, 4, 8], &device);

        let err = AttentionShape::for_forward(&q, &k, &v).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { arg: "q", .. }));
    }

    #[test]
    fn test_backward_dout_shape_rejected() {
        let (_client, device) = cpu_setup();
        let q = zeros(&[1, 2, 4, 8], &device);
        let k = zeros(&[1, 2, 4, 8], &device);
        let v = zeros(&[1, 2, 4, 8], &device);
        let out = zeros(&[1, 2, 4, 8], &device);
        let lse = zeros(&[1, 2, 4], &device);
        let dout = zeros(&[1, 2, 3, 8], &device);

        let err = AttentionShape::for_backward(&dout, &q, &k, &v, &out, &lse).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { arg: "dout", .. }));
    }

    #[test]
    fn test_backward_lse_shape_rejected() {
        let (_client, device) = cpu_setup();
        let q = zeros(&[1, 2, 4, 8], &device);
        let lse = zeros(&[1, 2, 4, 1], &device);

        let err = AttentionShape::for_backward(&q, &q, &q, &q, &q, &lse).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { arg: "lse", .. }));
    }

    #[test]
    fn test_scale() {
        let (_client, device) = cpu_setup();
        let q = zeros(&[1, 1, 2, 16], &device);
        let shape = AttentionShape::for_forward(&q, &q, &q).unwrap();
        assert!((shape.scale() - 0.25).abs() < 1e-12);
    }
}
