//! Shared helpers for flashattn2 integration tests.
#![allow(dead_code)]

use numr::runtime::cpu::{CpuClient, CpuDevice, CpuRuntime};
use numr::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

pub fn setup_cpu() -> (CpuClient, CpuDevice) {
    let device = CpuDevice::new();
    let client = CpuClient::new(device.clone());
    (client, device)
}

/// Deterministic pseudo-random tensor using sin-based pattern.
pub fn det_tensor(shape: &[usize], phase: f32, device: &CpuDevice) -> Tensor<CpuRuntime> {
    let n: usize = shape.iter().product();
    let data: Vec<f32> = (0..n).map(|i| (i as f32 * 0.1 + phase).sin() * 0.5).collect();
    Tensor::<CpuRuntime>::from_slice(&data, shape, device)
}

/// Seeded standard-normal data.
pub fn normal_data(n: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.sample::<f32, _>(StandardNormal)).collect()
}

pub fn normal_tensor(shape: &[usize], seed: u64, device: &CpuDevice) -> Tensor<CpuRuntime> {
    let n: usize = shape.iter().product();
    Tensor::<CpuRuntime>::from_slice(&normal_data(n, seed), shape, device)
}

/// Brute-force attention over full score rows, accumulated in f64.
///
/// `q: [B, H, S_q, D]`, `k`/`v: [B, H, S_k, D]`. Rows with no visible key
/// produce zeros and `-inf` logsumexp.
pub fn brute_force_attention(
    q: &[f32],
    k: &[f32],
    v: &[f32],
    batch_heads: usize,
    seq_len_q: usize,
    seq_len_k: usize,
    head_dim: usize,
    causal: bool,
) -> (Vec<f32>, Vec<f32>) {
    let scale = (head_dim as f64).sqrt().recip();
    let mut out = vec![0.0f32; batch_heads * seq_len_q * head_dim];
    let mut lse = vec![f32::NEG_INFINITY; batch_heads * seq_len_q];

    for bh in 0..batch_heads {
        let kv_base = bh * seq_len_k * head_dim;
        for i in 0..seq_len_q {
            let q_row = &q[(bh * seq_len_q + i) * head_dim..][..head_dim];
            let visible = if causal {
                (i + 1).min(seq_len_k)
            } else {
                seq_len_k
            };
            if visible == 0 {
                continue;
            }

            let scores: Vec<f64> = (0..visible)
                .map(|j| {
                    let k_row = &k[kv_base + j * head_dim..][..head_dim];
                    q_row
                        .iter()
                        .zip(k_row)
                        .map(|(&a, &b)| a as f64 * b as f64)
                        .sum::<f64>()
                        * scale
                })
                .collect();
            let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let weights: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
            let sum: f64 = weights.iter().sum();

            let o_row = &mut out[(bh * seq_len_q + i) * head_dim..][..head_dim];
            for (c, o) in o_row.iter_mut().enumerate() {
                let acc: f64 = weights
                    .iter()
                    .enumerate()
                    .map(|(j, w)| w * v[kv_base + j * head_dim + c] as f64)
                    .sum();
                *o = (acc / sum) as f32;
            }
            lse[bh * seq_len_q + i] = (max + sum.ln()) as f32;
        }
    }
    (out, lse)
}

pub fn assert_parity_f32_tol(a: &[f32], b: &[f32], op: &str, rtol: f32, atol: f32) {
    assert_eq!(
        a.len(),
        b.len(),
        "parity_f32[{}]: length mismatch: {} vs {}",
        op,
        a.len(),
        b.len()
    );
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        if x == y {
            // Covers matching infinities.
            continue;
        }
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        if !(diff <= tol) {
            panic!(
                "parity_f32[{}] at index {}: {} vs {} (diff={}, tol={})",
                op, i, x, y, diff, tol
            );
        }
    }
}

/// Maximum absolute elementwise difference.
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0f32, f32::max)
}
