//! CPU implementation of AttentionOps
//!
//! Standard O(N²) attention via numr Tensor ops. Materializes the full score
//! matrix; kept as the non-tiled reference for the flash kernel.

use super::flash::{AttentionShape, input_dtype, is_causally_masked};
use crate::error::{Error, Result};
use crate::ops::traits::AttentionOps;
use numr::dtype::DType;
use numr::ops::{ActivationOps, BinaryOps, CumulativeOps, MatmulOps, ScalarOps, TypeConversionOps};
use numr::runtime::cpu::{CpuClient, CpuRuntime};
use numr::tensor::Tensor;

impl AttentionOps<CpuRuntime> for CpuClient {
    fn attention_fwd(
        &self,
        q: &Tensor<CpuRuntime>,
        k: &Tensor<CpuRuntime>,
        v: &Tensor<CpuRuntime>,
        causal: bool,
    ) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
        let dtype = input_dtype(q, k, v)?;
        let shape = AttentionShape::resolve(q.shape(), k.shape(), v.shape())?;
        tracing::debug!(
            batch = shape.batch,
            heads = shape.heads,
            seq_len_q = shape.seq_len_q,
            seq_len_k = shape.seq_len_k,
            head_dim = shape.head_dim,
            causal,
            "standard attention forward"
        );
        standard_attention_fwd(self, q, k, v, &shape, causal, dtype)
    }
}

/// Standard attention forward on Tensors.
/// Returns (output, logsumexp) matching FlashAttention's interface.
///
/// Computes: output = softmax(Q @ K^T / sqrt(d) + mask) @ V
///           lse = logsumexp(Q @ K^T / sqrt(d) + mask, dim=-1)
fn standard_attention_fwd(
    client: &CpuClient,
    q: &Tensor<CpuRuntime>,
    k: &Tensor<CpuRuntime>,
    v: &Tensor<CpuRuntime>,
    shape: &AttentionShape,
    causal: bool,
    dtype: DType,
) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
    // Half inputs are widened so softmax statistics stay in F32
    let (q, k, v) = if dtype == DType::F32 {
        (q.clone(), k.clone(), v.clone())
    } else {
        (
            client.cast(q, DType::F32).map_err(Error::Numr)?,
            client.cast(k, DType::F32).map_err(Error::Numr)?,
            client.cast(v, DType::F32).map_err(Error::Numr)?,
        )
    };

    // Q @ K^T → [B, H, S_q, S_k]
    let k_t = k.transpose(-2, -1).map_err(Error::Numr)?;
    let k_t = k_t.contiguous();
    let scores = client.matmul(&q, &k_t).map_err(Error::Numr)?;

    // Scale
    let scores = client
        .mul_scalar(&scores, shape.scale())
        .map_err(Error::Numr)?;

    // Causal mask
    let scores = if causal {
        let mask = build_causal_mask(shape.seq_len_q, shape.seq_len_k, q.device());
        client.add(&scores, &mask).map_err(Error::Numr)?
    } else {
        scores
    };

    // Logsumexp: [B, H, S_q]
    let lse = client
        .logsumexp(&scores, &[3], false)
        .map_err(Error::Numr)?;

    // Softmax → [B, H, S_q, S_k]
    let weights = client.softmax(&scores, -1).map_err(Error::Numr)?;

    // Weights @ V → [B, H, S_q, D]
    let output = client.matmul(&weights, &v).map_err(Error::Numr)?;

    let output = if dtype == DType::F32 {
        output
    } else {
        client.cast(&output, dtype).map_err(Error::Numr)?
    };
    let lse = if lse.dtype() != DType::F32 {
        client.cast(&lse, DType::F32).map_err(Error::Numr)?
    } else {
        lse
    };

    Ok((output, lse))
}

/// Build additive causal mask: 0 where key `j <= i`, -inf otherwise.
fn build_causal_mask(
    seq_len_q: usize,
    seq_len_k: usize,
    device: &<CpuRuntime as numr::runtime::Runtime>::Device,
) -> Tensor<CpuRuntime> {
    let mut mask_data = vec![0.0f32; seq_len_q * seq_len_k];
    for i in 0..seq_len_q {
        for j in 0..seq_len_k {
            if is_causally_masked(i, j) {
                mask_data[i * seq_len_k + j] = f32::NEG_INFINITY;
            }
        }
    }
    Tensor::<CpuRuntime>::from_slice(&mask_data, &[1, 1, seq_len_q, seq_len_k], device)
}
