//! flashgrad error types

use numr::dtype::DType;

/// flashgrad result type
pub type Result<T> = std::result::Result<T, Error>;

/// flashgrad errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from numr operations
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),

    /// Tensor shape does not fit the attention layout contract
    #[error("shape mismatch for '{arg}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Argument name
        arg: &'static str,
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// DType mismatch between operands
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },

    /// Storage dtype the kernels cannot read
    #[error("unsupported dtype for '{arg}': {dtype}")]
    UnsupportedDType {
        /// Argument name
        arg: &'static str,
        /// The offending dtype
        dtype: DType,
    },

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },
}
