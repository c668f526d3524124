//! Shape arithmetic for rank-4 row-major buffers.
//!
//! Strides are implied by the shape: `stride(d) = product(shape[d+1..])`.

use std::ops::Range;

use crate::error::{LayerError, Result};

/// Number of axes every blob carries: batch, channel, height, width.
pub const NUM_AXES: usize = 4;

/// Blob shape `[N, C, H, W]`.
pub type Shape4 = [usize; NUM_AXES];

/// Axis index of the batch dimension.
pub const AXIS_BATCH: usize = 0;
/// Axis index of the channel dimension.
pub const AXIS_CHANNEL: usize = 1;
/// Axis index of the height dimension.
pub const AXIS_HEIGHT: usize = 2;
/// Axis index of the width dimension.
pub const AXIS_WIDTH: usize = 3;

/// Resolve a possibly negative axis index against `num_axes`.
///
/// `-1` addresses the last axis, `-num_axes` the first one.
pub fn canonical_axis(axis: isize, num_axes: usize) -> Result<usize> {
    let n = num_axes as isize;
    if axis < -n || axis >= n {
        return Err(LayerError::invalid_configuration(format!(
            "axis {} out of range for a {}-axis blob",
            axis, num_axes
        )));
    }
    Ok(if axis < 0 { (axis + n) as usize } else { axis as usize })
}

/// Product of `shape[start..end]`.
pub fn count(shape: &[usize], start: usize, end: usize) -> usize {
    shape[start..end].iter().product()
}

/// Row-major strides for `shape`.
pub fn strides(shape: &Shape4) -> Shape4 {
    let mut strides = [1; NUM_AXES];
    for axis in (0..NUM_AXES - 1).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Flat offset of `indices` in a buffer of `shape`.
///
/// Missing trailing indices are treated as zero.
pub fn offset(shape: &Shape4, indices: &[usize]) -> usize {
    debug_assert!(indices.len() <= NUM_AXES);
    let strides = strides(shape);
    indices
        .iter()
        .zip(strides.iter())
        .map(|(index, stride)| index * stride)
        .sum()
}

/// Per-axis index ranges of the `extent`-sized window starting at `offsets`.
pub fn window(offsets: &Shape4, extent: &Shape4) -> [Range<usize>; NUM_AXES] {
    std::array::from_fn(|axis| offsets[axis]..offsets[axis] + extent[axis])
}
