//! Concatenation along one axis.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use warpkit_core::layer::{check_blob_count, check_min_blob_count};
use warpkit_core::{Blob, ConcatParameter, Layer, LayerError, LayerParameter, Result, Shape4, NUM_AXES};

/// Layer concatenating K inputs into one output.
#[derive(Debug, Clone)]
pub struct ConcatLayer {
    name: String,
    param: ConcatParameter,
}

impl ConcatLayer {
    pub const TYPE: &'static str = "Concat";

    /// Create a concat layer.
    pub fn new(param: ConcatParameter) -> Result<Self> {
        param.validate()?;
        Ok(Self {
            name: String::new(),
            param,
        })
    }

    pub fn from_parameter(param: &LayerParameter) -> Result<Self> {
        let mut layer = Self::new(param.concat.clone().unwrap_or_default())?;
        layer.name = param.name.clone();
        Ok(layer)
    }

    fn output_shape(&self, shapes: &[Shape4]) -> Result<(usize, Shape4)> {
        let axis = self.param.resolved_axis(NUM_AXES)?;
        let mut top_shape = shapes[0];
        for input_shape in &shapes[1..] {
            for a in (0..NUM_AXES).filter(|a| *a != axis) {
                if input_shape[a] != top_shape[a] {
                    return Err(LayerError::dimension_mismatch(format!(
                        "all inputs must have the same shape, except at concat axis {}: {:?} vs {:?}",
                        axis, shapes[0], input_shape
                    )));
                }
            }
            top_shape[axis] += input_shape[axis];
        }
        Ok((axis, top_shape))
    }
}

impl<B: Backend> Layer<B> for ConcatLayer {
    fn layer_type(&self) -> &'static str {
        Self::TYPE
    }

    fn setup(&mut self, bottom: &[Blob<B>], top: &[Blob<B>]) -> Result<()> {
        check_min_blob_count(Self::TYPE, "bottom", 1, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())?;
        self.param.validate()
    }

    fn reshape(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        check_min_blob_count(Self::TYPE, "bottom", 1, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())?;
        let shapes: Vec<Shape4> = bottom.iter().map(Blob::shape).collect();
        let (axis, top_shape) = self.output_shape(&shapes)?;
        tracing::debug!(layer = %self.name, axis, inputs = bottom.len(), ?top_shape, "reshape");
        top[0].reshape(top_shape);

        let bottom_count: usize = bottom.iter().map(Blob::count).sum();
        if bottom_count != top[0].count() {
            return Err(LayerError::shape_mismatch(&[bottom_count], &[top[0].count()]));
        }
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        check_min_blob_count(Self::TYPE, "bottom", 1, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())?;
        let shapes: Vec<Shape4> = bottom.iter().map(Blob::shape).collect();
        let (axis, top_shape) = self.output_shape(&shapes)?;
        if top[0].shape() != top_shape {
            return Err(LayerError::shape_mismatch(&top_shape, &top[0].shape()));
        }
        tracing::trace!(layer = %self.name, "forward");

        let inputs = bottom.iter().map(|blob| blob.data().clone()).collect();
        top[0].set_data(Tensor::cat(inputs, axis))
    }

    fn backward(
        &mut self,
        _top: &[Blob<B>],
        _propagate_down: &[bool],
        _bottom: &mut [Blob<B>],
    ) -> Result<()> {
        Err(LayerError::not_implemented(Self::TYPE, "backward"))
    }
}
