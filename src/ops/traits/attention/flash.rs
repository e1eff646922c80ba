//! Attention operations traits

use crate::config::TileConfig;
use crate::error::Result;
use numr::autograd::Var;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Dense multi-head attention (generic, uses impl_generic on all backends)
///
/// Composite op composed from numr primitives (matmul, softmax, etc.).
/// Uses `Var<R>` so numr's autograd differentiates it directly; this is the
/// full-matrix reference the blockwise kernels are checked against.
///
/// # Layout contract
///
/// - `q`: `[B, H, S_q, D]`: queries
/// - `k`: `[B, H, S_k, D]`: keys
/// - `v`: `[B, H, S_k, D]`: values
/// - `mask`: optional, broadcastable to `[B, H, S_q, S_k]`, **additive** (-inf for masked positions)
/// - Output: `[B, H, S_q, D]`
pub trait AttentionOps<R: Runtime> {
    fn multi_head_attention(
        &self,
        q: &Var<R>,
        k: &Var<R>,
        v: &Var<R>,
        mask: Option<&Var<R>>,
    ) -> Result<Var<R>>;
}

/// Blockwise (flash) attention with a recomputation-based backward.
///
/// The forward never materializes the `[S_q, S_k]` weight matrix; it saves one
/// log-sum-exp scalar per query row instead. The backward rebuilds weight tiles
/// from `(Q, K, LSE)` on the fly.
///
/// # Layout contract
///
/// - `q`: `[B, H, S_q, D]`: queries
/// - `k`: `[B, H, S_k, D]`: keys
/// - `v`: `[B, H, S_k, D]`: values
/// - Output: `[B, H, S_q, D]`, same dtype as `q`
/// - Logsumexp: `[B, H, S_q]`, always F32
///
/// Storage dtypes F32, F16 and BF16 are accepted. All score, weight and
/// gradient arithmetic runs in a wider format and is narrowed on the final write.
///
/// # Causal masking
///
/// With `causal`, query row `i` attends to key columns `j <= i` (indices aligned
/// at the top-left, ties included).
pub trait FlashAttentionOps<R: Runtime> {
    /// Flash attention forward with explicit tile widths.
    ///
    /// Returns `(output, logsumexp)`.
    fn flash_attention_fwd_with_tiles(
        &self,
        q: &Tensor<R>,
        k: &Tensor<R>,
        v: &Tensor<R>,
        causal: bool,
        tiles: &TileConfig,
    ) -> Result<(Tensor<R>, Tensor<R>)>;

    /// Flash attention backward with explicit tile widths.
    ///
    /// # Arguments
    /// - `dout`: gradient of output `[B, H, S_q, D]`
    /// - `q`, `k`, `v`: original inputs from forward pass
    /// - `output`: forward pass output
    /// - `lse`: logsumexp from forward pass `[B, H, S_q]`
    ///
    /// # Returns
    /// `(dq, dk, dv)`: freshly allocated, same shapes and dtype as the inputs
    #[allow(clippy::too_many_arguments)]
    fn flash_attention_bwd_with_tiles(
        &self,
        dout: &Tensor<R>,
        q: &Tensor<R>,
        k: &Tensor<R>,
        v: &Tensor<R>,
        output: &Tensor<R>,
        lse: &Tensor<R>,
        causal: bool,
        tiles: &TileConfig,
    ) -> Result<(Tensor<R>, Tensor<R>, Tensor<R>)>;

    /// Flash attention forward with default tiles.
    fn flash_attention_fwd(
        &self,
        q: &Tensor<R>,
        k: &Tensor<R>,
        v: &Tensor<R>,
        causal: bool,
    ) -> Result<(Tensor<R>, Tensor<R>)> {
        self.flash_attention_fwd_with_tiles(q, k, v, causal, &TileConfig::default())
    }

    /// Flash attention backward with default tiles.
    #[allow(clippy::too_many_arguments)]
    fn flash_attention_bwd(
        &self,
        dout: &Tensor<R>,
        q: &Tensor<R>,
        k: &Tensor<R>,
        v: &Tensor<R>,
        output: &Tensor<R>,
        lse: &Tensor<R>,
        causal: bool,
    ) -> Result<(Tensor<R>, Tensor<R>, Tensor<R>)> {
        self.flash_attention_bwd_with_tiles(
            dout,
            q,
            k,
            v,
            output,
            lse,
            causal,
            &TileConfig::default(),
        )
    }
}
