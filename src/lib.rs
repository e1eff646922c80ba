//! # flashgrad
//!
//! **Blockwise attention with a recomputation-based backward, built on numr.**
//!
//! The forward pass streams key/value tiles through an online softmax and keeps
//! only one log-sum-exp scalar per query row. The backward never stores the
//! `[S_q, S_k]` weight matrix either: it rebuilds each weight tile from
//! `(Q, K, LSE)` and splits the gradient work into two independent kernels.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ var_flash_attention         (numr autograd integration)   │
//! ├───────────────────────────────────────────────────────────┤
//! │ FlashAttentionOps on CpuClient                            │
//! │   forward: online softmax, emits O and LSE                │
//! │   backward: dQ kernel per query tile                      │
//! │             dK/dV kernel per key tile                     │
//! ├───────────────────────────────────────────────────────────┤
//! │ numr    (tensors, runtime, autograd, dtype casts)         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - **Extension traits**: attention ops implemented directly on numr's clients
//! - **impl_generic**: dense attention composed from numr primitives, used as the
//!   full-matrix reference
//! - **Host kernels**: f64 tile arithmetic, rayon over disjoint output tiles

pub mod config;
pub mod error;
pub mod ops;

pub use config::TileConfig;
pub use error::{Error, Result};
pub use ops::{AttentionOps, AttentionShape, FlashAttentionOps};
pub use ops::{var_flash_attention, var_flash_attention_with_tiles};

// Re-export numr types that users will commonly need
pub use numr::dtype::DType;
pub use numr::error::{Error as NumrError, Result as NumrResult};
pub use numr::runtime::{Runtime, RuntimeClient};
pub use numr::tensor::Tensor;
