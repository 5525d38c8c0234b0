//! Score & mask stage: `S = (Q_tile @ K_tile^T) * scale`, causally masked.

use super::schedule::TileRange;

/// Whether the query at absolute position `q_pos` may not see key `k_pos`.
///
/// Causal attention allows past and self: `k <= q`.
#[inline]
pub fn is_causally_masked(q_pos: usize, k_pos: usize) -> bool {
    k_pos > q_pos
}

/// Scores for one (query tile, key tile) pair, row-major `[rows, cols]`.
///
/// Masked entries hold `-inf`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBlock {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl ScoreBlock {
    /// Compute scores for the query rows `query` against key rows `key`.
    ///
    /// `q_rows` holds `query.len()` rows of `head_dim` values and `k_rows`
    /// holds `key.len()` rows; both are row-major slices of the tile only.
    pub fn compute(
        q_rows: &[f32],
        k_rows: &[f32],
        head_dim: usize,
        scale: f64,
        query: TileRange,
        key: TileRange,
        causal: bool,
    ) -> Self {
        let rows = query.len();
        let cols = key.len();
        debug_assert_eq!(q_rows.len(), rows * head_dim);
        debug_assert_eq!(k_rows.len(), cols * head_dim);

        let mut data = Vec::with_capacity(rows * cols);
        for (q_pos, q_row) in query.positions().zip(q_rows.chunks_exact(head_dim)) {
            for (k_pos, k_row) in key.positions().zip(k_rows.chunks_exact(head_dim)) {
                if causal && is_causally_masked(q_pos, k_pos) {
                    data.push(f64::NEG_INFINITY);
                } else {
                    data.push(dot_f64(q_row, k_row) * scale);
                }
            }
        }

        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Largest score in row `i`; `-inf` when every entry is masked.
    pub fn row_max(&self, i: usize) -> f64 {
        self.row(i).iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// Dot product accumulated in f64.
#[inline]
fn dot_f64(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum()
}
