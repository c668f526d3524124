//! Splitting one input into several outputs along an axis.
//!
//! `"Slice"` emits every piece. `"Sliceseg"` emits only the first one: the
//! piece before the first split point, or the lower half of the axis when no
//! split points are given.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use warpkit_core::blob::shape;
use warpkit_core::layer::{check_blob_count, check_min_blob_count};
use warpkit_core::{Blob, Layer, LayerError, LayerParameter, Result, Shape4, SliceParameter, NUM_AXES};

/// The `extent`-sized window of `input` starting at `offsets`.
pub(crate) fn window<B: Backend>(input: &Tensor<B, 4>, offsets: &Shape4, extent: Shape4) -> Tensor<B, 4> {
    if extent.contains(&0) {
        return Tensor::zeros(extent, &input.device());
    }
    input.clone().slice(shape::window(offsets, &extent))
}

/// Layer slicing one input into M outputs, or into its first piece only.
#[derive(Debug, Clone)]
pub struct SliceLayer {
    name: String,
    param: SliceParameter,
    first_only: bool,
}

impl SliceLayer {
    pub const TYPE: &'static str = "Slice";
    pub const SEGMENT_TYPE: &'static str = "Sliceseg";

    /// Create a slice layer emitting every piece.
    pub fn new(param: SliceParameter) -> Result<Self> {
        param.validate()?;
        Ok(Self {
            name: String::new(),
            param,
            first_only: false,
        })
    }

    /// Create a slice layer emitting only the first piece.
    pub fn segment(param: SliceParameter) -> Result<Self> {
        let mut layer = Self::new(param)?;
        layer.first_only = true;
        Ok(layer)
    }

    pub fn from_parameter(param: &LayerParameter) -> Result<Self> {
        let slice = param.slice.clone().unwrap_or_default();
        let mut layer = if param.layer_type == Self::SEGMENT_TYPE {
            Self::segment(slice)?
        } else {
            Self::new(slice)?
        };
        layer.name = param.name.clone();
        Ok(layer)
    }

    fn type_name(&self) -> &'static str {
        if self.first_only {
            Self::SEGMENT_TYPE
        } else {
            Self::TYPE
        }
    }

    fn check_blobs(&self, bottom: usize, top: usize) -> Result<()> {
        check_blob_count(self.type_name(), "bottom", 1, bottom)?;
        if self.first_only {
            check_blob_count(self.type_name(), "top", 1, top)
        } else {
            check_min_blob_count(self.type_name(), "top", 1, top)
        }
    }

    fn output_shapes(&self, input_shape: Shape4, outputs: usize) -> Result<(usize, Vec<Shape4>)> {
        let axis = self.param.resolved_axis(NUM_AXES)?;
        let sizes = if self.first_only {
            vec![self.param.first_piece(input_shape[axis])?]
        } else {
            self.param.piece_sizes(input_shape[axis], outputs)?
        };
        if sizes.len() != outputs {
            return Err(LayerError::invalid_configuration(format!(
                "{} slice point(s) produce {} pieces but {} top blobs were given",
                self.param.slice_point.len(),
                sizes.len(),
                outputs
            )));
        }
        let shapes = sizes
            .into_iter()
            .map(|size| {
                let mut top_shape = input_shape;
                top_shape[axis] = size;
                top_shape
            })
            .collect();
        Ok((axis, shapes))
    }
}

impl<B: Backend> Layer<B> for SliceLayer {
    fn layer_type(&self) -> &'static str {
        self.type_name()
    }

    fn setup(&mut self, bottom: &[Blob<B>], top: &[Blob<B>]) -> Result<()> {
        self.check_blobs(bottom.len(), top.len())?;
        self.param.validate()
    }

    fn reshape(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        self.check_blobs(bottom.len(), top.len())?;
        let (axis, shapes) = self.output_shapes(bottom[0].shape(), top.len())?;
        tracing::debug!(layer = %self.name, axis, ?shapes, "reshape");
        for (blob, top_shape) in top.iter_mut().zip(shapes) {
            blob.reshape(top_shape);
        }
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        self.check_blobs(bottom.len(), top.len())?;
        let (axis, shapes) = self.output_shapes(bottom[0].shape(), top.len())?;
        for (blob, top_shape) in top.iter().zip(shapes.iter()) {
            if blob.shape() != *top_shape {
                return Err(LayerError::shape_mismatch(top_shape, &blob.shape()));
            }
        }
        tracing::trace!(layer = %self.name, "forward");

        let mut offsets = [0; NUM_AXES];
        for (blob, top_shape) in top.iter_mut().zip(shapes) {
            blob.set_data(window(bottom[0].data(), &offsets, top_shape))?;
            offsets[axis] += top_shape[axis];
        }
        Ok(())
    }

    fn backward(
        &mut self,
        _top: &[Blob<B>],
        _propagate_down: &[bool],
        _bottom: &mut [Blob<B>],
    ) -> Result<()> {
        Err(LayerError::not_implemented(self.type_name(), "backward"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    fn run(layer: &mut SliceLayer, input: Vec<f32>, shape: Shape4, outputs: usize) -> Result<Vec<Blob<Backend>>> {
        let device = Default::default();
        let bottom = vec![Blob::<Backend>::from_vec(input, shape, &device)?];
        let mut top: Vec<Blob<Backend>> = (0..outputs).map(|_| Blob::new(&device)).collect();
        Layer::<Backend>::setup(layer, &bottom, &top)?;
        Layer::<Backend>::reshape(layer, &bottom, &mut top)?;
        Layer::<Backend>::forward(layer, &bottom, &mut top)?;
        Ok(top)
    }

    #[test]
    fn test_slice_channels_at_points() {
        let mut layer = SliceLayer::new(SliceParameter::default().with_slice_points(vec![1])).unwrap();
        let top = run(&mut layer, (0..6).map(|v| v as f32).collect(), [2, 3, 1, 1], 2).unwrap();
        assert_eq!(top[0].data_vec().unwrap(), vec![0.0, 3.0]);
        assert_eq!(top[1].data_vec().unwrap(), vec![1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn test_output_shapes_even_split() {
        let layer = SliceLayer::new(SliceParameter::default().with_axis(2)).unwrap();
        let (axis, shapes) = layer.output_shapes([1, 3, 8, 4], 2).unwrap();
        assert_eq!(axis, 2);
        assert_eq!(shapes, vec![[1, 3, 4, 4], [1, 3, 4, 4]]);
    }

    #[test]
    fn test_output_shapes_require_matching_top_count() {
        let layer = SliceLayer::new(SliceParameter::default().with_slice_points(vec![1, 2])).unwrap();
        assert!(layer.output_shapes([1, 4, 2, 2], 2).is_err());
        assert!(layer.output_shapes([1, 4, 2, 2], 3).is_ok());
    }

    #[test]
    fn test_segment_defaults_to_lower_half() {
        let mut layer = SliceLayer::segment(SliceParameter::default().with_axis(2)).unwrap();
        let top = run(&mut layer, (0..10).map(|v| v as f32).collect(), [1, 1, 5, 2], 1).unwrap();
        // Odd extent: 5 / 2 = 2 rows.
        assert_eq!(top[0].shape(), [1, 1, 2, 2]);
        assert_eq!(top[0].data_vec().unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_segment_takes_first_piece_of_points() {
        let param = SliceParameter::default().with_slice_points(vec![1, 3]);
        let mut layer = SliceLayer::segment(param).unwrap();
        let top = run(&mut layer, (0..8).map(|v| v as f32).collect(), [2, 4, 1, 1], 1).unwrap();
        assert_eq!(top[0].shape(), [2, 1, 1, 1]);
        assert_eq!(top[0].data_vec().unwrap(), vec![0.0, 4.0]);
    }

    #[test]
    fn test_segment_needs_exactly_one_top() {
        let mut layer = SliceLayer::segment(SliceParameter::default()).unwrap();
        let err = run(&mut layer, vec![0.0; 4], [1, 4, 1, 1], 2).unwrap_err();
        assert!(matches!(err, LayerError::BlobCount { layer: "Sliceseg", .. }));
    }

    #[test]
    fn test_segment_of_single_element_axis_is_empty() {
        let mut layer = SliceLayer::segment(SliceParameter::default()).unwrap();
        let top = run(&mut layer, vec![1.0, 2.0], [1, 1, 1, 2], 1).unwrap();
        assert_eq!(top[0].shape(), [1, 0, 1, 2]);
        assert_eq!(top[0].count(), 0);
    }
}
