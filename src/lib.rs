//! # flashattn2
//!
//! **FlashAttention-2 forward pass on numr tensors.**
//!
//! Computes scaled dot-product attention for `[B, H, S, D]` query/key/value
//! tensors without materializing the `[S_q, S_k]` score matrix. Queries are
//! cut into tiles, keys stream through each query tile in tiles, and an online
//! softmax keeps a running max, normalizer and weighted output per row. The
//! forward pass returns the attention output and the per-row log-sum-exp a
//! gradient pass would need.
//!
//! ## Relationship to numr
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                flashattn2 ◄── YOU ARE HERE              │
//! │   (tiling, online softmax, causal masking, logsumexp)   │
//! └────────────────────────────┬────────────────────────────┘
//!                              │
//! ┌────────────────────────────▼────────────────────────────┐
//! │                          numr                           │
//! │    (tensors, matmul, softmax, dtype casts, runtime)     │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - **Extension traits**: `FlashAttentionOps` / `AttentionOps` implemented on numr's clients
//! - **Tiled kernel**: shape → schedule → score/mask → online softmax → finalize
//! - **Reference path**: `AttentionOps::attention_fwd` composes numr primitives (O(N²))
//! - **Parallelism**: independent (batch, head, query-tile) units on rayon

pub mod config;
pub mod error;
pub mod ops;

// Re-export primary flashattn2 traits
pub use config::FlashAttentionConfig;
pub use ops::{AttentionOps, FlashAttentionOps};

// Re-export numr types that users will commonly need
pub use numr::dtype::DType;
pub use numr::error::{Error as NumrError, Result as NumrResult};
pub use numr::runtime::{Runtime, RuntimeClient};
pub use numr::tensor::Tensor;
