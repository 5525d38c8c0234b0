//! Attention operations traits

use crate::config::FlashAttentionConfig;
use crate::error::Result;
use numr::runtime::Runtime;
use numr::tensor::Tensor;

/// Standard (non-tiled) scaled dot-product attention
///
/// Composite op composed from numr primitives (matmul, softmax, logsumexp).
/// Materializes the full `[B, H, S_q, S_k]` score matrix, so it is the
/// reference the flash kernel is checked against rather than a fast path.
///
/// # Layout contract
///
/// - `q`: `[B, H, S_q, D]` — queries
/// - `k`: `[B, H, S_k, D]` — keys
/// - `v`: `[B, H, S_k, D]` — values
/// - Output: `[B, H, S_q, D]` in the input dtype
/// - Logsumexp: `[B, H, S_q]` (F32)
pub trait AttentionOps<R: Runtime> {
    fn attention_fwd(
        &self,
        q: &Tensor<R>,
        k: &Tensor<R>,
        v: &Tensor<R>,
        causal: bool,
    ) -> Result<(Tensor<R>, Tensor<R>)>;
}

/// Flash Attention v2 — tiled O(N) memory attention
///
/// Q is cut into query tiles and K/V into key tiles. Each query tile streams
/// over the key tiles with an online softmax, so the full score matrix is
/// never materialized. Tile sizes only affect rounding and speed.
///
/// # Layout contract
///
/// - `q`: `[B, H, S_q, D]` — queries
/// - `k`: `[B, H, S_k, D]` — keys
/// - `v`: `[B, H, S_k, D]` — values
/// - Output: `[B, H, S_q, D]` in the input dtype
/// - Logsumexp: `[B, H, S_q]` (F32, for backward pass)
///
/// B, H and D must match between Q and K; S_q and S_k may differ.
///
/// # Causal masking
///
/// When `causal` is set, query position `i` attends to key positions `j <= i`
/// (positions counted from 0 in both sequences). A query row with no visible
/// key gets a zero output row and `logsumexp = -inf`.
pub trait FlashAttentionOps<R: Runtime> {
    /// Flash Attention forward pass with the default tiling (128 × 128).
    ///
    /// Returns `(output, logsumexp)`. The logsumexp tensor is always F32.
    fn flash_attention_fwd(
        &self,
        q: &Tensor<R>,
        k: &Tensor<R>,
        v: &Tensor<R>,
        causal: bool,
    ) -> Result<(Tensor<R>, Tensor<R>)> {
        self.flash_attention_fwd_with_config(q, k, v, causal, &FlashAttentionConfig::default())
    }

    /// Flash Attention forward pass with explicit tiling.
    fn flash_attention_fwd_with_config(
        &self,
        q: &Tensor<R>,
        k: &Tensor<R>,
        v: &Tensor<R>,
        causal: bool,
        config: &FlashAttentionConfig,
    ) -> Result<(Tensor<R>, Tensor<R>)>;

    /// Flash Attention backward pass
    ///
    /// Would compute `(dq, dk, dv)` from the output gradient and the forward
    /// outputs. Not implemented: every backend returns
    /// [`Error::Unimplemented`](crate::error::Error::Unimplemented).
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
    ) -> Result<(Tensor<R>, Tensor<R>, Tensor<R>)>;
}
