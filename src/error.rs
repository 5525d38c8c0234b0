//! flashattn2 error types

use numr::dtype::DType;

/// flashattn2 result type
pub type Result<T> = std::result::Result<T, Error>;

/// flashattn2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error from numr operations
    #[error("numr error: {0}")]
    Numr(#[from] numr::error::Error),

    /// Q, K and V disagree on a dimension that must be shared
    #[error("shape mismatch for '{arg}': expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Argument whose shape is wrong
        arg: &'static str,
        /// Shape implied by the other inputs
        expected: Vec<usize>,
        /// Actual shape
        got: Vec<usize>,
    },

    /// DType mismatch between inputs
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        /// Expected dtype
        expected: DType,
        /// Actual dtype
        got: DType,
    },

    /// Invalid argument to an operation
    #[error("invalid argument '{arg}': {reason}")]
    InvalidArgument {
        /// Argument name
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Invalid attention configuration
    #[error("config error: {reason}")]
    ConfigError {
        /// Description of what went wrong
        reason: String,
    },

    /// Operation exists in the API but has no implementation
    #[error("operation '{op}' is not implemented")]
    Unimplemented {
        /// Operation name
        op: &'static str,
    },
}
