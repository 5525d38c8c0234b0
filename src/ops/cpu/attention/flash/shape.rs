//! Shape resolution for the flash attention forward pass
//!
//! Validates the `[B, H, N, D]` layout contract of Q, K and V and derives the
//! problem dimensions every later stage works from.

use crate::error::{Error, Result};

/// Problem dimensions resolved from the Q/K/V shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionShape {
    pub batch: usize,
    pub heads: usize,
    pub seq_len_q: usize,
    pub seq_len_k: usize,
    pub head_dim: usize,
}

impl AttentionShape {
    /// Resolve dimensions from `q: [B, H, S_q, D]`, `k: [B, H, S_k, D]`,
    /// `v: [B, H, S_k, D]`.
    ///
    /// Batch, head count and hidden dimension must agree between Q and K,
    /// and V must have exactly K's shape.
    pub fn resolve(q: &[usize], k: &[usize], v: &[usize]) -> Result<Self> {
        for (arg, shape, layout) in [
            ("q", q, "[B, H, S_q, D]"),
            ("k", k, "[B, H, S_k, D]"),
            ("v", v, "[B, H, S_k, D]"),
        ] {
            if shape.len() != 4 {
                return Err(Error::InvalidArgument {
                    arg,
                    reason: format!("expected 4D {layout}, got {}D", shape.len()),
                });
            }
        }

        if q[0] != k[0] || q[1] != k[1] || q[3] != k[3] {
            return Err(Error::ShapeMismatch {
                arg: "k",
                expected: vec![q[0], q[1], k[2], q[3]],
                got: k.to_vec(),
            });
        }
        if v != k {
            return Err(Error::ShapeMismatch {
                arg: "v",
                expected: k.to_vec(),
                got: v.to_vec(),
            });
        }
        if q[3] == 0 {
            return Err(Error::InvalidArgument {
                arg: "q",
                reason: "head_dim must be > 0".into(),
            });
        }

        Ok(Self {
            batch: q[0],
            heads: q[1],
            seq_len_q: q[2],
            seq_len_k: k[2],
            head_dim: q[3],
        })
    }

    /// Softmax temperature `1 / sqrt(D)`.
    pub fn scale(&self) -> f64 {
        (self.head_dim as f64).sqrt().recip()
    }

    /// Number of independent (batch, head) pairs.
    pub fn batch_heads(&self) -> usize {
        self.batch * self.heads
    }

    pub fn output_shape(&self) -> [usize; 4] {
        [self.batch, self.heads, self.seq_len_q, self.head_dim]
    }

    pub fn lse_shape(&self) -> [usize; 3] {
        [self.batch, self.heads, self.seq_len_q]
    }

    /// Elements in one (batch, head) slab of Q or O.
    pub fn q_head_len(&self) -> usize {
        self.seq_len_q * self.head_dim
    }

    /// Elements in one (batch, head) slab of K or V.
    pub fn kv_head_len(&self) -> usize {
        self.seq_len_k * self.head_dim
    }
}
