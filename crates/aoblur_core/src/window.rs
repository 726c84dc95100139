//! Per-pixel 1D neighbourhoods along one image axis.

use ndarray::{Array3, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::float_trait::AoFloat;

/// Direction a 1D window slides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterAxis {
    /// Along a row: neighbours differ in column index (horizontal).
    Row,
    /// Along a column: neighbours differ in row index (vertical).
    Column,
}

impl FilterAxis {
    /// Order in which a separable pass visits the axes.
    pub const PASS_ORDER: [FilterAxis; 2] = [FilterAxis::Row, FilterAxis::Column];
}

/// Number of taps of a window with the given radius.
#[inline]
pub fn window_len(radius: usize) -> usize {
    2 * radius + 1
}

/// Window offsets `[-R, ..., R]` in tap order.
pub fn window_offsets(radius: usize) -> impl Iterator<Item = isize> {
    let r = radius as isize;
    -r..=r
}

/// Gather, for every pixel, the `2R+1` values along `axis` centred on it.
///
/// Output shape is (rows, cols, 2R+1); tap `k` holds the value at offset
/// `k - R`. Samples that fall outside the image read as zero (no replication
/// or reflection), so windows near the border see zeros.
pub fn neighbor_window<S: AoFloat>(
    image: ArrayView2<S>,
    radius: usize,
    axis: FilterAxis,
) -> Array3<S> {
    let (rows, cols) = image.dim();
    let taps = window_len(radius);
    let mut window = Array3::zeros((rows, cols, taps));

    for r in 0..rows {
        for c in 0..cols {
            for (k, offset) in window_offsets(radius).enumerate() {
                let (src_r, src_c) = match axis {
                    FilterAxis::Row => (r as isize, c as isize + offset),
                    FilterAxis::Column => (r as isize + offset, c as isize),
                };
                if src_r >= 0 && src_c >= 0 && (src_r as usize) < rows && (src_c as usize) < cols {
                    window[[r, c, k]] = image[[src_r as usize, src_c as usize]];
                }
            }
        }
    }

    window
}
