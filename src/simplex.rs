//! Rounding probabilities onto the discretised simplex.
//!
//! Layout 1.2 stores each probability as an integer `k / (2^b - 1)` and
//! leaves out the last value of every group, which the reader recovers as one
//! minus the others. Rounding the values independently could push the stored
//! ones above `2^b - 1` in total, so the whole group is rounded at once.

use crate::bits::max_value;
use crate::{FormatError, Result};

/// How far a group of probabilities may drift from one before it is rejected.
pub const SUM_TOLERANCE: f64 = 0.01;

/// Round `probs` (summing to approximately one) to integers in
/// `[0, 2^bits - 1]` that sum to exactly `2^bits - 1`.
///
/// Each value is scaled and floored; the units still missing from the total
/// go to the entries with the largest fractional parts, ties resolved by
/// position. `order` is scratch space and is reused between calls.
///
/// ```
/// use bgen_codec::simplex::round_to_scaled_simplex;
/// let mut out = Vec::new();
/// let mut order = Vec::new();
/// round_to_scaled_simplex(&[1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0], 2, &mut out, &mut order);
/// // 3 units to share: one each
/// assert_eq!(out, vec![1, 1, 1]);
/// round_to_scaled_simplex(&[0.5, 0.25, 0.25], 1, &mut out, &mut order);
/// assert_eq!(out.iter().sum::<u64>(), 1);
/// assert_eq!(out, vec![1, 0, 0]);
/// ```
pub fn round_to_scaled_simplex(
    probs: &[f64],
    bits: u8,
    rounded: &mut Vec<u64>,
    order: &mut Vec<(f64, usize)>,
) {
    rounded.clear();
    order.clear();
    if probs.is_empty() {
        return;
    }
    let total = max_value(bits);
    let scale = total as f64;

    let mut floor_sum: u64 = 0;
    for (i, p) in probs.iter().enumerate() {
        let scaled = (p.max(0.0) * scale).min(scale);
        let floor = scaled.floor();
        rounded.push(floor as u64);
        floor_sum += floor as u64;
        order.push((scaled - floor, i));
    }

    // largest remainder first, lower index first among equals
    order.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    if floor_sum <= total {
        let mut leftover = total - floor_sum;
        while leftover > 0 {
            for &(_, i) in order.iter() {
                if leftover == 0 {
                    break;
                }
                rounded[i] += 1;
                leftover -= 1;
            }
        }
    } else {
        // only reachable when the input sums to slightly more than one
        let mut excess = floor_sum - total;
        while excess > 0 {
            for &(_, i) in order.iter().rev() {
                if excess == 0 {
                    break;
                }
                if rounded[i] > 0 {
                    rounded[i] -= 1;
                    excess -= 1;
                }
            }
        }
    }
}

/// Check that a group of probabilities sums to one within [`SUM_TOLERANCE`]
/// and rescale it so that it sums to one exactly.
pub fn normalise(probs: &mut [f64]) -> Result<()> {
    let sum: f64 = probs.iter().sum();
    if !(sum >= 1.0 - SUM_TOLERANCE && sum <= 1.0 + SUM_TOLERANCE) {
        Err(FormatError::ProbabilitySum { sum })?;
    }
    probs.iter_mut().for_each(|p| *p /= sum);
    Ok(())
}
