//! Online softmax accumulator
//!
//! Per query row the accumulator carries the running max `m`, the running sum
//! `l = Σ exp(s - m)` and the running output `o = Σ exp(s - m) · v`, all in
//! f64. After any prefix of key tiles, `o / l` is the exact softmax-weighted
//! sum of the values seen so far.
//!
//! Key tiles are folded in with [`OnlineSoftmax::update`]:
//!
//! ```text
//! m_new = max(m, rowmax(S))
//! o, l  *= exp(m - m_new)
//! P      = exp(S - m_new)
//! l     += rowsum(P)
//! o     += P @ V
//! m      = m_new
//! ```
//!
//! `-inf` is the "nothing seen yet" max and the masked score, so the two
//! exponentials are evaluated through [`rescale_factor`] and [`shifted_exp`],
//! which map a `-inf` operand to exactly 0 instead of `exp(NaN)`.

use super::score::ScoreBlock;

/// `exp(old_max - new_max)`, or 0 when nothing has been accumulated yet.
#[inline]
pub fn rescale_factor(old_max: f64, new_max: f64) -> f64 {
    if old_max == f64::NEG_INFINITY {
        0.0
    } else {
        (old_max - new_max).exp()
    }
}

/// `exp(score - max)`, or 0 for a masked score.
#[inline]
pub fn shifted_exp(score: f64, max: f64) -> f64 {
    if score == f64::NEG_INFINITY {
        0.0
    } else {
        (score - max).exp()
    }
}

/// Running `(m, l, o)` triple for the rows of one query tile.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineSoftmax {
    head_dim: usize,
    max: Vec<f64>,
    sum: Vec<f64>,
    output: Vec<f64>,
}

impl OnlineSoftmax {
    /// Empty state: `m = -inf`, `l = 0`, `o = 0`.
    pub fn new(rows: usize, head_dim: usize) -> Self {
        Self {
            head_dim,
            max: vec![f64::NEG_INFINITY; rows],
            sum: vec![0.0; rows],
            output: vec![0.0; rows * head_dim],
        }
    }

    pub fn rows(&self) -> usize {
        self.max.len()
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Running max per row.
    pub fn running_max(&self) -> &[f64] {
        &self.max
    }

    /// Running normalizer per row, relative to [`running_max`](Self::running_max).
    pub fn running_sum(&self) -> &[f64] {
        &self.sum
    }

    /// Unnormalized running output, row-major `[rows, head_dim]`.
    pub fn running_output(&self) -> &[f64] {
        &self.output
    }

    /// Fold one key tile into the state.
    ///
    /// `scores` is the (masked) score block of this query tile against the
    /// key tile and `v_rows` the matching `scores.cols()` value rows.
    #[must_use]
    pub fn update(mut self, scores: &ScoreBlock, v_rows: &[f32]) -> Self {
        let d = self.head_dim;
        debug_assert_eq!(scores.rows(), self.rows());
        debug_assert_eq!(v_rows.len(), scores.cols() * d);

        for i in 0..self.rows() {
            let s_row = scores.row(i);
            let m_old = self.max[i];
            let m_new = m_old.max(scores.row_max(i));

            let alpha = rescale_factor(m_old, m_new);
            let o_row = &mut self.output[i * d..(i + 1) * d];
            o_row.iter_mut().for_each(|o| *o *= alpha);
            let mut l = self.sum[i] * alpha;

            for (&s, v_row) in s_row.iter().zip(v_rows.chunks_exact(d)) {
                let p = shifted_exp(s, m_new);
                if p == 0.0 {
                    continue;
                }
                l += p;
                for (o, &v) in o_row.iter_mut().zip(v_row) {
                    *o += p * v as f64;
                }
            }

            self.sum[i] = l;
            self.max[i] = m_new;
        }
        self
    }

    /// Combine two partial states over disjoint key sets of the same rows.
    ///
    /// Each side is rescaled to the joint max, so the result equals folding
    /// both key sets into one state. The order of the operands does not
    /// matter beyond rounding.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        debug_assert_eq!(self.rows(), other.rows());
        debug_assert_eq!(self.head_dim, other.head_dim);
        let d = self.head_dim;

        for i in 0..self.rows() {
            let m_new = self.max[i].max(other.max[i]);
            let alpha = rescale_factor(self.max[i], m_new);
            let beta = rescale_factor(other.max[i], m_new);

            self.sum[i] = self.sum[i] * alpha + other.sum[i] * beta;
            let o_row = &mut self.output[i * d..(i + 1) * d];
            for (o, &o_other) in o_row.iter_mut().zip(&other.output[i * d..(i + 1) * d]) {
                *o = *o * alpha + o_other * beta;
            }
            self.max[i] = m_new;
        }
        self
    }

    pub(crate) fn into_parts(self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        (self.max, self.sum, self.output)
    }
}
