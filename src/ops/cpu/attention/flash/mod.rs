//! CPU implementation of FlashAttentionOps
//!
//! FlashAttention-2 forward pass on host memory:
//!
//!   1. Resolve `[B, H, S, D]` shapes and tile counts      (`shape`, `schedule`)
//!   2. For every (batch, head, query tile) — in parallel over rayon:
//!      a. stream key tiles in increasing order            (`schedule`)
//!      b. scores + causal mask for the tile pair          (`score`)
//!      c. fold into the running (m, l, o) triple          (`online_softmax`)
//!   3. Normalize and write output rows + logsumexp       (`finalize`)
//!
//! Work units write disjoint regions of the output buffers, so the parallel
//! path needs neither locks nor unsafe pointer sharing.

mod finalize;
mod online_softmax;
mod schedule;
mod score;
mod shape;

pub use finalize::finalize_tile;
pub use online_softmax::{OnlineSoftmax, rescale_factor, shifted_exp};
pub use schedule::{TileRange, TileScheduler, WorkItem};
pub use score::{ScoreBlock, is_causally_masked};
pub use shape::AttentionShape;

use crate::config::FlashAttentionConfig;
use crate::error::{Error, Result};
use crate::ops::traits::FlashAttentionOps;
use numr::dtype::DType;
use numr::ops::TypeConversionOps;
use numr::runtime::cpu::{CpuClient, CpuRuntime};
use numr::tensor::Tensor;
use rayon::prelude::*;

impl FlashAttentionOps<CpuRuntime> for CpuClient {
    fn flash_attention_fwd_with_config(
        &self,
        q: &Tensor<CpuRuntime>,
        k: &Tensor<CpuRuntime>,
        v: &Tensor<CpuRuntime>,
        causal: bool,
        config: &FlashAttentionConfig,
    ) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
        let dtype = input_dtype(q, k, v)?;
        let shape = AttentionShape::resolve(q.shape(), k.shape(), v.shape())?;
        let scheduler = TileScheduler::new(shape, config)?;

        tracing::debug!(
            batch = shape.batch,
            heads = shape.heads,
            seq_len_q = shape.seq_len_q,
            seq_len_k = shape.seq_len_k,
            head_dim = shape.head_dim,
            query_tiles = scheduler.num_query_tiles(),
            key_tiles = scheduler.num_key_tiles(),
            causal,
            parallel = config.parallel,
            %dtype,
            "flash attention forward"
        );

        let q_data = host_f32(self, q)?;
        let k_data = host_f32(self, k)?;
        let v_data = host_f32(self, v)?;

        let (out, lse) =
            flash_attention_host(&q_data, &k_data, &v_data, &scheduler, causal, config.parallel)?;

        let device = q.device();
        let output = Tensor::<CpuRuntime>::from_slice(&out, &shape.output_shape(), device);
        let output = if dtype == DType::F32 {
            output
        } else {
            self.cast(&output, dtype).map_err(Error::Numr)?
        };
        let lse = Tensor::<CpuRuntime>::from_slice(&lse, &shape.lse_shape(), device);

        Ok((output, lse))
    }

    fn flash_attention_bwd(
        &self,
        _dout: &Tensor<CpuRuntime>,
        _q: &Tensor<CpuRuntime>,
        _k: &Tensor<CpuRuntime>,
        _v: &Tensor<CpuRuntime>,
        _output: &Tensor<CpuRuntime>,
        _lse: &Tensor<CpuRuntime>,
        _causal: bool,
    ) -> Result<(Tensor<CpuRuntime>, Tensor<CpuRuntime>, Tensor<CpuRuntime>)> {
        Err(Error::Unimplemented {
            op: "flash_attention_bwd",
        })
    }
}

/// Shared dtype of Q, K and V. Half inputs are computed in F32 and cast back.
pub(crate) fn input_dtype(
    q: &Tensor<CpuRuntime>,
    k: &Tensor<CpuRuntime>,
    v: &Tensor<CpuRuntime>,
) -> Result<DType> {
    let dtype = q.dtype();
    for t in [k, v] {
        if t.dtype() != dtype {
            return Err(Error::DTypeMismatch {
                expected: dtype,
                got: t.dtype(),
            });
        }
    }
    match dtype {
        DType::F32 | DType::F16 | DType::BF16 => Ok(dtype),
        other => Err(Error::InvalidArgument {
            arg: "dtype",
            reason: format!("flash attention supports F32, F16 and BF16, got {other}"),
        }),
    }
}

/// Contiguous F32 copy of a tensor's elements.
fn host_f32(client: &CpuClient, t: &Tensor<CpuRuntime>) -> Result<Vec<f32>> {
    let t = if t.dtype() == DType::F32 {
        t.contiguous()
    } else {
        client.cast(t, DType::F32).map_err(Error::Numr)?.contiguous()
    };
    Ok(t.to_vec::<f32>())
}

/// Flash attention forward on contiguous `[B, H, S, D]` f32 host buffers.
///
/// Returns `(output [B, H, S_q, D], logsumexp [B, H, S_q])`.
pub fn flash_attention_host(
    q: &[f32],
    k: &[f32],
    v: &[f32],
    scheduler: &TileScheduler,
    causal: bool,
    parallel: bool,
) -> Result<(Vec<f32>, Vec<f32>)> {
    let shape = scheduler.shape();
    let bh = shape.batch_heads();
    for (arg, data, expected) in [
        ("q", q, bh * shape.q_head_len()),
        ("k", k, bh * shape.kv_head_len()),
        ("v", v, bh * shape.kv_head_len()),
    ] {
        if data.len() != expected {
            return Err(Error::InvalidArgument {
                arg,
                reason: format!("expected {expected} elements, got {}", data.len()),
            });
        }
    }

    let mut out = vec![0.0f32; bh * shape.q_head_len()];
    let mut lse = vec![f32::NEG_INFINITY; bh * shape.seq_len_q];
    if out.is_empty() {
        return Ok((out, lse));
    }

    if parallel {
        // A tile never holds more rows than the sequence has
        let q_tile_rows = scheduler.query_tile_size().min(shape.seq_len_q);
        let q_tile_len = q_tile_rows * shape.head_dim;
        out.par_chunks_mut(shape.q_head_len())
            .zip(lse.par_chunks_mut(shape.seq_len_q))
            .enumerate()
            .for_each(|(bh, (out_head, lse_head))| {
                out_head
                    .par_chunks_mut(q_tile_len)
                    .zip(lse_head.par_chunks_mut(q_tile_rows))
                    .enumerate()
                    .for_each(|(i, (out_tile, lse_tile))| {
                        let item = scheduler.work_item(bh, i);
                        attend_query_tile(q, k, v, scheduler, &item, causal, out_tile, lse_tile);
                    });
            });
    } else {
        for item in scheduler.work_items() {
            let out_tile = &mut out[scheduler.output_range(&item)];
            let lse_tile = &mut lse[scheduler.lse_range(&item)];
            attend_query_tile(q, k, v, scheduler, &item, causal, out_tile, lse_tile);
        }
    }

    Ok((out, lse))
}

/// Stream every visible key tile through one query tile and finalize it.
#[allow(clippy::too_many_arguments)]
fn attend_query_tile(
    q: &[f32],
    k: &[f32],
    v: &[f32],
    scheduler: &TileScheduler,
    item: &WorkItem,
    causal: bool,
    out: &mut [f32],
    lse: &mut [f32],
) {
    let shape = scheduler.shape();
    let d = shape.head_dim;
    let bh = item.batch_head(shape.heads);
    let q_head = &q[bh * shape.q_head_len()..(bh + 1) * shape.q_head_len()];
    let k_head = &k[bh * shape.kv_head_len()..(bh + 1) * shape.kv_head_len()];
    let v_head = &v[bh * shape.kv_head_len()..(bh + 1) * shape.kv_head_len()];

    let q_rows = &q_head[item.query.elements(d)];
    let scale = shape.scale();

    let mut visited = 0usize;
    let state = scheduler.key_tiles(item.query, causal).fold(
        OnlineSoftmax::new(item.query.len(), d),
        |state, key| {
            visited += 1;
            let scores = ScoreBlock::compute(
                q_rows,
                &k_head[key.elements(d)],
                d,
                scale,
                item.query,
                key,
                causal,
            );
            state.update(&scores, &v_head[key.elements(d)])
        },
    );

    tracing::trace!(
        batch = item.batch,
        head = item.head,
        query_tile = item.query_tile,
        key_tiles = visited,
        "query tile finalized"
    );
    finalize_tile(state, out, lse);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::cpu_setup;

    fn rand_tensor(
        shape: &[usize],
        seed: f32,
        device: &<CpuRuntime as numr::runtime::Runtime>::Device,
    ) -> Tensor<CpuRuntime> {
        // Simple deterministic pseudo-random data
        let n: usize = shape.iter().product();
        let data: Vec<f32> = (0..n).map(|i| (i as f32 * 0.1 + seed).sin() * 0.5).collect();
        Tensor::<CpuRuntime>::from_slice(&data, shape, device)
    }

    fn scheduler_for(shape: [usize; 4], kv_len: usize, qts: usize, kts: usize) -> TileScheduler {
        let kv = [shape[0], shape[1], kv_len, shape[3]];
        let resolved = AttentionShape::resolve(&shape, &kv, &kv).unwrap();
        TileScheduler::new(resolved, &FlashAttentionConfig::default().with_tile_sizes(qts, kts))
            .unwrap()
    }

    #[test]
    fn test_flash_fwd_output_shape() {
        let (client, device) = cpu_setup();
        let (b, h, s, d) = (2, 4, 8, 16);
        let q = rand_tensor(&[b, h, s, d], 0.0, &device);
        let k = rand_tensor(&[b, h, s, d], 1.0, &device);
        let v = rand_tensor(&[b, h, s, d], 2.0, &device);

        let (out, lse) = client.flash_attention_fwd(&q, &k, &v, false).unwrap();
        assert_eq!(out.shape(), &[b, h, s, d]);
        assert_eq!(lse.shape(), &[b, h, s]);
        assert_eq!(lse.dtype(), DType::F32);
    }

    #[test]
    fn test_flash_fwd_causal_differs_from_full() {
        let (client, device) = cpu_setup();
        let (b, h, s, d) = (1, 2, 6, 8);
        let q = rand_tensor(&[b, h, s, d], 0.0, &device);
        let k = rand_tensor(&[b, h, s, d], 1.0, &device);
        let v = rand_tensor(&[b, h, s, d], 2.0, &device);

        let (out_causal, _) = client.flash_attention_fwd(&q, &k, &v, true).unwrap();
        let (out_full, _) = client.flash_attention_fwd(&q, &k, &v, false).unwrap();

        let oc = out_causal.to_vec::<f32>();
        let of = out_full.to_vec::<f32>();
        let max_diff = oc
            .iter()
            .zip(of.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_diff > 1e-6, "Causal and non-causal outputs should differ");

        // The last row sees every key either way.
        for c in 0..d {
            let idx = (s - 1) * d + c;
            assert!((oc[idx] - of[idx]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let scheduler = scheduler_for([2, 3, 11, 4], 9, 4, 2);
        let n_q = 2 * 3 * 11 * 4;
        let n_k = 2 * 3 * 9 * 4;
        let q: Vec<f32> = (0..n_q).map(|i| (i as f32 * 0.37).sin()).collect();
        let k: Vec<f32> = (0..n_k).map(|i| (i as f32 * 0.21).cos()).collect();
        let v: Vec<f32> = (0..n_k).map(|i| (i as f32 * 0.05).sin() * 3.0).collect();

        for causal in [false, true] {
            let seq = flash_attention_host(&q, &k, &v, &scheduler, causal, false).unwrap();
            let par = flash_attention_host(&q, &k, &v, &scheduler, causal, true).unwrap();
            assert_eq!(seq, par);
        }
    }

    #[test]
    fn test_oversized_tiles_match_sequential() {
        let scheduler = scheduler_for([1, 1, 5, 4], 5, usize::MAX / 2, 3);
        let q: Vec<f32> = (0..20).map(|i| (i as f32 * 0.3).sin()).collect();
        let k: Vec<f32> = (0..20).map(|i| (i as f32 * 0.7).cos()).collect();
        let v: Vec<f32> = (0..20).map(|i| i as f32 * 0.1).collect();

        for causal in [false, true] {
            let seq = flash_attention_host(&q, &k, &v, &scheduler, causal, false).unwrap();
            let par = flash_attention_host(&q, &k, &v, &scheduler, causal, true).unwrap();
            assert_eq!(seq.0.len(), 20);
            assert_eq!(seq, par);
        }

        let wide = scheduler_for([1, 1, 5, 4], 5, 2, usize::MAX);
        let par = flash_attention_host(&q, &k, &v, &wide, true, true).unwrap();
        let base = scheduler_for([1, 1, 5, 4], 5, 2, 2);
        let expected = flash_attention_host(&q, &k, &v, &base, true, false).unwrap();
        assert_eq!(par.0.len(), expected.0.len());
        for (a, b) in par.0.iter().zip(&expected.0) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_host_rejects_wrong_buffer_length() {
        let scheduler = scheduler_for([1, 1, 4, 2], 4, 2, 2);
        let err = flash_attention_host(&[0.0; 8], &[0.0; 7], &[0.0; 8], &scheduler, false, true)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "k", .. }));
    }

    #[test]
    fn test_empty_key_sequence_gives_degenerate_rows() {
        let scheduler = scheduler_for([1, 2, 3, 4], 0, 2, 2);
        let q = vec![1.0f32; 2 * 3 * 4];
        let (out, lse) = flash_attention_host(&q, &[], &[], &scheduler, false, true).unwrap();
        assert!(out.iter().all(|&x| x == 0.0));
        assert!(lse.iter().all(|&x| x == f32::NEG_INFINITY));
    }

    #[test]
    fn test_empty_query_sequence() {
        let scheduler = scheduler_for([1, 2, 0, 4], 5, 2, 2);
        let kv = vec![0.5f32; 2 * 5 * 4];
        let (out, lse) = flash_attention_host(&[], &kv, &kv, &scheduler, true, true).unwrap();
        assert!(out.is_empty());
        assert!(lse.is_empty());
    }

    #[test]
    fn test_flash_bwd_is_unimplemented() {
        let (client, device) = cpu_setup();
        let t = rand_tensor(&[1, 1, 4, 8], 0.0, &device);
        let (out, lse) = client.flash_attention_fwd(&t, &t, &t, false).unwrap();
        let err = client
            .flash_attention_bwd(&t, &t, &t, &t, &out, &lse, false)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Unimplemented {
                op: "flash_attention_bwd"
            }
        ));
    }

    #[test]
    fn test_dtype_mismatch_rejected() {
        let (client, device) = cpu_setup();
        let q = rand_tensor(&[1, 1, 4, 8], 0.0, &device);
        let k = client.cast(&q, DType::F16).unwrap();
        let err = client.flash_attention_fwd(&q, &k, &q, false).unwrap_err();
        assert!(matches!(err, Error::DTypeMismatch { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (client, device) = cpu_setup();
        let t = rand_tensor(&[1, 1, 4, 8], 0.0, &device);
        let config = FlashAttentionConfig::default().with_query_tile_size(0);
        let err = client
            .flash_attention_fwd_with_config(&t, &t, &t, false, &config)
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError { .. }));
    }
}
