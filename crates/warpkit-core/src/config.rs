//! Layer configuration records.
//!
//! A [`LayerParameter`] names a layer type and carries the optional
//! per-layer sub-records. Records are validated at setup and reshape time.

use serde::{Deserialize, Serialize};

use crate::blob::canonical_axis;
use crate::error::{LayerError, Result};

/// Default axis for concat and slice: the channel axis.
pub const DEFAULT_AXIS: isize = 1;

/// Default first axis cut by the cut layers: the height axis.
pub const DEFAULT_CUT_AXIS: isize = 2;

/// Descriptor of a single layer instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerParameter {
    /// Instance name, used in log output.
    pub name: String,
    /// Registered type name, e.g. `"BilinearSampler"`.
    pub layer_type: String,
    /// Concat settings.
    pub concat: Option<ConcatParameter>,
    /// Slice settings (shared by `"Slice"` and `"Sliceseg"`).
    pub slice: Option<SliceParameter>,
    /// Cut settings (shared by `"Cut"` and `"Cutwo"`).
    pub cut: Option<CutParameter>,
    /// Maxout settings.
    pub maxout: Option<MaxoutParameter>,
}

impl LayerParameter {
    /// Create a descriptor for the given type name.
    pub fn new(name: impl Into<String>, layer_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer_type: layer_type.into(),
            ..Self::default()
        }
    }

    /// Attach concat settings.
    pub fn with_concat(mut self, param: ConcatParameter) -> Self {
        self.concat = Some(param);
        self
    }

    /// Attach slice settings.
    pub fn with_slice(mut self, param: SliceParameter) -> Self {
        self.slice = Some(param);
        self
    }

    /// Attach cut settings.
    pub fn with_cut(mut self, param: CutParameter) -> Self {
        self.cut = Some(param);
        self
    }

    /// Attach maxout settings.
    pub fn with_maxout(mut self, param: MaxoutParameter) -> Self {
        self.maxout = Some(param);
        self
    }
}

/// Resolve the modern `axis` field against the legacy dimension index.
fn resolve_axis(
    axis: Option<isize>,
    legacy_dim: Option<usize>,
    legacy_name: &str,
    num_axes: usize,
) -> Result<usize> {
    match (axis, legacy_dim) {
        (Some(_), Some(_)) => Err(LayerError::invalid_configuration(format!(
            "either axis or {} should be specified; not both",
            legacy_name
        ))),
        (None, Some(dim)) => {
            if dim >= num_axes {
                return Err(LayerError::invalid_configuration(format!(
                    "{} {} out of range for a {}-axis blob",
                    legacy_name, dim, num_axes
                )));
            }
            Ok(dim)
        }
        (axis, None) => canonical_axis(axis.unwrap_or(DEFAULT_AXIS), num_axes),
    }
}

/// Concat settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcatParameter {
    /// Concat axis; negative values count from the last axis. Defaults to 1.
    pub axis: Option<isize>,
    /// Legacy non-negative axis index. Mutually exclusive with `axis`.
    pub concat_dim: Option<usize>,
}

impl ConcatParameter {
    /// Concat along `axis`.
    pub fn with_axis(mut self, axis: isize) -> Self {
        self.axis = Some(axis);
        self
    }

    /// Concat along the legacy dimension index.
    pub fn with_concat_dim(mut self, dim: usize) -> Self {
        self.concat_dim = Some(dim);
        self
    }

    /// Reject records that set both `axis` and `concat_dim`.
    pub fn validate(&self) -> Result<()> {
        if self.axis.is_some() && self.concat_dim.is_some() {
            return Err(LayerError::invalid_configuration(
                "either axis or concat_dim should be specified; not both",
            ));
        }
        Ok(())
    }

    /// Resolve the concat axis for a blob with `num_axes` axes.
    pub fn resolved_axis(&self, num_axes: usize) -> Result<usize> {
        resolve_axis(self.axis, self.concat_dim, "concat_dim", num_axes)
    }
}

/// Slice settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SliceParameter {
    /// Slice axis; negative values count from the last axis. Defaults to 1.
    pub axis: Option<isize>,
    /// Legacy non-negative axis index. Mutually exclusive with `axis`.
    pub slice_dim: Option<usize>,
    /// Explicit split points along the axis, strictly increasing.
    pub slice_point: Vec<usize>,
}

impl SliceParameter {
    /// Slice along `axis`.
    pub fn with_axis(mut self, axis: isize) -> Self {
        self.axis = Some(axis);
        self
    }

    /// Slice along the legacy dimension index.
    pub fn with_slice_dim(mut self, dim: usize) -> Self {
        self.slice_dim = Some(dim);
        self
    }

    /// Split at explicit points.
    pub fn with_slice_points(mut self, points: Vec<usize>) -> Self {
        self.slice_point = points;
        self
    }

    /// Reject records that set both `axis` and `slice_dim`.
    pub fn validate(&self) -> Result<()> {
        if self.axis.is_some() && self.slice_dim.is_some() {
            return Err(LayerError::invalid_configuration(
                "either axis or slice_dim should be specified; not both",
            ));
        }
        Ok(())
    }

    /// Resolve the slice axis for a blob with `num_axes` axes.
    pub fn resolved_axis(&self, num_axes: usize) -> Result<usize> {
        resolve_axis(self.axis, self.slice_dim, "slice_dim", num_axes)
    }

    /// Piece sizes along an axis of extent `extent`.
    ///
    /// Without split points the extent is divided evenly across `pieces`.
    pub fn piece_sizes(&self, extent: usize, pieces: usize) -> Result<Vec<usize>> {
        if self.slice_point.is_empty() {
            if pieces == 0 || extent % pieces != 0 {
                return Err(LayerError::invalid_configuration(format!(
                    "number of outputs ({}) should evenly divide the sliced extent ({})",
                    pieces, extent
                )));
            }
            return Ok(vec![extent / pieces; pieces]);
        }

        let mut sizes = Vec::with_capacity(self.slice_point.len() + 1);
        let mut prev = 0;
        for &point in &self.slice_point {
            if point <= prev || point >= extent {
                return Err(LayerError::invalid_configuration(format!(
                    "slice point {} must be greater than {} and below the sliced extent {}",
                    point, prev, extent
                )));
            }
            sizes.push(point - prev);
            prev = point;
        }
        sizes.push(extent - prev);
        Ok(sizes)
    }

    /// Extent of the first piece only: the first split point, or half of
    /// `extent` (rounded down) without split points.
    pub fn first_piece(&self, extent: usize) -> Result<usize> {
        if self.slice_point.is_empty() {
            return Ok(extent / 2);
        }
        let sizes = self.piece_sizes(extent, self.slice_point.len() + 1)?;
        Ok(sizes[0])
    }
}

/// Cut settings.
///
/// The cut layers crop every axis from `axis` on. One offset applies to all
/// cut axes; several offsets must match the number of cut axes one to one.
/// `halve_axis` names an axis whose extent is halved in the output, and
/// `second_offset` positions the second crop of the paired variant along it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CutParameter {
    /// First axis to cut; negative values count from the last axis.
    pub axis: isize,
    /// Crop offsets for the primary output.
    pub offset: Vec<usize>,
    /// Axis whose output extent is half the input extent.
    pub halve_axis: Option<usize>,
    /// Offset of the secondary crop along `halve_axis`. Defaults to the
    /// output extent of that axis, i.e. the second half.
    pub second_offset: Option<usize>,
}

impl Default for CutParameter {
    fn default() -> Self {
        Self {
            axis: DEFAULT_CUT_AXIS,
            offset: Vec::new(),
            halve_axis: Some(2),
            second_offset: None,
        }
    }
}

impl CutParameter {
    /// Cut from `axis` on.
    pub fn with_axis(mut self, axis: isize) -> Self {
        self.axis = axis;
        self
    }

    /// Set the primary crop offsets.
    pub fn with_offsets(mut self, offsets: Vec<usize>) -> Self {
        self.offset = offsets;
        self
    }

    /// Halve a different axis, or none.
    pub fn with_halve_axis(mut self, axis: Option<usize>) -> Self {
        self.halve_axis = axis;
        self
    }

    /// Position the secondary crop along the halved axis.
    pub fn with_second_offset(mut self, offset: usize) -> Self {
        self.second_offset = Some(offset);
        self
    }

    /// Resolve the first cut axis and check the offset count.
    pub fn resolved_axis(&self, num_axes: usize) -> Result<usize> {
        let start_axis = canonical_axis(self.axis, num_axes)?;
        if self.offset.len() > 1 && start_axis + self.offset.len() != num_axes {
            return Err(LayerError::invalid_configuration(format!(
                "number of offset values ({}) must equal the number of axes following axis {} ({})",
                self.offset.len(),
                start_axis,
                num_axes - start_axis
            )));
        }
        Ok(start_axis)
    }

    /// Primary crop offset for `axis`, given the first cut axis.
    pub fn offset_for(&self, axis: usize, start_axis: usize) -> usize {
        if axis < start_axis {
            return 0;
        }
        match self.offset.len() {
            0 => 0,
            1 => self.offset[0],
            _ => self.offset[axis - start_axis],
        }
    }
}

/// Maxout settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxoutParameter {
    /// Number of output channels, i.e. channel groups.
    pub num_output: usize,
}

impl MaxoutParameter {
    /// Create maxout settings with `num_output` groups.
    pub fn new(num_output: usize) -> Self {
        Self { num_output }
    }

    /// Group size for `channels` input channels.
    pub fn group_size(&self, channels: usize) -> Result<usize> {
        if self.num_output == 0 {
            return Err(LayerError::invalid_configuration("output number cannot be zero"));
        }
        if channels % self.num_output != 0 {
            return Err(LayerError::invalid_configuration(format!(
                "number of channels ({}) should be a multiple of num_output ({})",
                channels, self.num_output
            )));
        }
        Ok(channels / self.num_output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_axis_resolution() {
        assert_eq!(ConcatParameter::default().resolved_axis(4).unwrap(), 1);
        assert_eq!(ConcatParameter::default().with_axis(-1).resolved_axis(4).unwrap(), 3);
        assert_eq!(ConcatParameter::default().with_concat_dim(0).resolved_axis(4).unwrap(), 0);
        assert!(ConcatParameter::default().with_concat_dim(4).resolved_axis(4).is_err());
    }

    #[test]
    fn test_axis_and_legacy_dim_conflict() {
        let concat = ConcatParameter::default().with_axis(1).with_concat_dim(1);
        assert!(concat.validate().is_err());
        assert!(concat.resolved_axis(4).is_err());

        let slice = SliceParameter::default().with_axis(1).with_slice_dim(1);
        assert!(slice.validate().is_err());
    }

    #[test]
    fn test_slice_piece_sizes() {
        let even = SliceParameter::default();
        assert_eq!(even.piece_sizes(6, 3).unwrap(), vec![2, 2, 2]);
        assert!(even.piece_sizes(7, 2).is_err());

        let points = SliceParameter::default().with_slice_points(vec![1, 4]);
        assert_eq!(points.piece_sizes(6, 3).unwrap(), vec![1, 3, 2]);

        let unordered = SliceParameter::default().with_slice_points(vec![3, 2]);
        assert!(unordered.piece_sizes(6, 3).is_err());
        let past_end = SliceParameter::default().with_slice_points(vec![6]);
        assert!(past_end.piece_sizes(6, 2).is_err());
    }

    #[test]
    fn test_cut_offset_count() {
        let param = CutParameter::default().with_axis(1).with_offsets(vec![0, 1, 2]);
        assert_eq!(param.resolved_axis(4).unwrap(), 1);
        assert_eq!(param.offset_for(0, 1), 0);
        assert_eq!(param.offset_for(2, 1), 1);
        assert_eq!(param.offset_for(3, 1), 2);

        let mismatched = CutParameter::default().with_axis(2).with_offsets(vec![0, 1, 2]);
        assert!(mismatched.resolved_axis(4).is_err());

        let single = CutParameter::default().with_offsets(vec![3]);
        assert_eq!(single.offset_for(3, 2), 3);
        assert_eq!(single.offset_for(1, 2), 0);
    }

    #[test]
    fn test_maxout_group_size() {
        assert_eq!(MaxoutParameter::new(2).group_size(6).unwrap(), 3);
        assert!(MaxoutParameter::new(0).group_size(6).is_err());
        assert!(MaxoutParameter::new(4).group_size(6).is_err());
    }

    #[test]
    fn test_first_piece() {
        assert_eq!(SliceParameter::default().first_piece(7).unwrap(), 3);
        let points = SliceParameter::default().with_slice_points(vec![2, 5]);
        assert_eq!(points.first_piece(6).unwrap(), 2);
        assert!(points.first_piece(4).is_err());
    }

    #[test]
    fn test_layer_parameter_json_round_trip() {
        let param = LayerParameter::new("crop", "Cutwo")
            .with_cut(CutParameter::default().with_offsets(vec![1, 0]).with_second_offset(3))
            .with_slice(SliceParameter::default().with_slice_dim(2).with_slice_points(vec![4]))
            .with_maxout(MaxoutParameter::new(2));
        let json = serde_json::to_string(&param).unwrap();
        let parsed: LayerParameter = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, param);
    }

    #[test]
    fn test_missing_json_fields_take_defaults() {
        let parsed: LayerParameter =
            serde_json::from_str(r#"{"name": "c", "layer_type": "Cut", "cut": {"offset": [2]}}"#).unwrap();
        let cut = parsed.cut.unwrap();
        assert_eq!(cut.offset, vec![2]);
        assert_eq!(cut, CutParameter::default().with_offsets(vec![2]));
        assert!(parsed.concat.is_none());
    }
}
