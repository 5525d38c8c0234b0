//! Tile finalizer: normalize the accumulated output and emit log-sum-exp.

use super::online_softmax::OnlineSoftmax;

/// Write `o / l` and `m + ln(l)` for every row of a finished query tile.
///
/// A row that saw no unmasked key has `l == 0`; it gets an all-zero output
/// row and `LSE = -inf` rather than a division by zero.
pub fn finalize_tile(state: OnlineSoftmax, out: &mut [f32], lse: &mut [f32]) {
    let d = state.head_dim();
    let rows = state.rows();
    debug_assert_eq!(out.len(), rows * d);
    debug_assert_eq!(lse.len(), rows);

    let (max, sum, output) = state.into_parts();
    for i in 0..rows {
        let l = sum[i];
        let l_inv = if l > 0.0 { l.recip() } else { 0.0 };
        for (dst, &o) in out[i * d..(i + 1) * d]
            .iter_mut()
            .zip(&output[i * d..(i + 1) * d])
        {
            *dst = (o * l_inv) as f32;
        }
        // ln(0) = -inf marks a row with no attended keys.
        lse[i] = (max[i] + l.ln()) as f32;
    }
}
