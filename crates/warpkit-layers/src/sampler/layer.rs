use burn::tensor::backend::Backend;
use warpkit_core::blob::shape::{AXIS_BATCH, AXIS_CHANNEL};
use warpkit_core::layer::{check_blob_count, check_propagate_down};
use warpkit_core::{Blob, Layer, LayerError, LayerParameter, Result, Shape4};

use super::bilinear::{self, GRID_CHANNELS};

const GRID: usize = 0;
const SOURCE: usize = 1;

/// Differentiable bilinear sampler (spatial transformer sampling stage).
///
/// Bottoms: `[grid (N, 2, Ho, Wo), source (N, C, Hs, Ws)]`.
/// Top: `(N, C, Ho, Wo)`. The layer has no tunable parameters.
#[derive(Debug, Clone, Default)]
pub struct BilinearSamplerLayer {
    name: String,
}

impl BilinearSamplerLayer {
    pub const TYPE: &'static str = "BilinearSampler";

    /// Create a sampler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sampler from its descriptor.
    pub fn from_parameter(param: &LayerParameter) -> Result<Self> {
        Ok(Self {
            name: param.name.clone(),
        })
    }

    fn validate_inputs(grid: Shape4, source: Shape4) -> Result<()> {
        if grid[AXIS_CHANNEL] != GRID_CHANNELS {
            return Err(LayerError::dimension_mismatch(format!(
                "sampling grid must have {} channels, got {}",
                GRID_CHANNELS, grid[AXIS_CHANNEL]
            )));
        }
        if grid[AXIS_BATCH] != source[AXIS_BATCH] {
            return Err(LayerError::dimension_mismatch(format!(
                "grid batch ({}) and source batch ({}) differ",
                grid[AXIS_BATCH], source[AXIS_BATCH]
            )));
        }
        Ok(())
    }

    /// Validated output shape for `bottom`, compared against the current top.
    fn checked_top_shape<B: Backend>(bottom: &[Blob<B>], top: &Blob<B>) -> Result<Shape4> {
        let grid_shape = bottom[GRID].shape();
        let source_shape = bottom[SOURCE].shape();
        Self::validate_inputs(grid_shape, source_shape)?;
        let top_shape = bilinear::output_shape(grid_shape, source_shape);
        if top.shape() != top_shape {
            return Err(LayerError::shape_mismatch(&top_shape, &top.shape()));
        }
        Ok(top_shape)
    }
}

impl<B: Backend> Layer<B> for BilinearSamplerLayer {
    fn layer_type(&self) -> &'static str {
        Self::TYPE
    }

    fn setup(&mut self, bottom: &[Blob<B>], top: &[Blob<B>]) -> Result<()> {
        check_blob_count(Self::TYPE, "bottom", 2, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())
    }

    fn reshape(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        check_blob_count(Self::TYPE, "bottom", 2, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())?;
        let grid_shape = bottom[GRID].shape();
        let source_shape = bottom[SOURCE].shape();
        Self::validate_inputs(grid_shape, source_shape)?;

        let top_shape = bilinear::output_shape(grid_shape, source_shape);
        tracing::debug!(layer = %self.name, ?grid_shape, ?source_shape, ?top_shape, "reshape");
        if top_shape.contains(&0) {
            tracing::warn!(layer = %self.name, ?top_shape, "sampler output is empty");
        }
        top[0].reshape(top_shape);
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        check_blob_count(Self::TYPE, "bottom", 2, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())?;
        Self::checked_top_shape(bottom, &top[0])?;
        tracing::trace!(layer = %self.name, "forward");

        let output = bilinear::forward(bottom[GRID].data().clone(), bottom[SOURCE].data().clone());
        top[0].set_data(output)
    }

    fn backward(
        &mut self,
        top: &[Blob<B>],
        propagate_down: &[bool],
        bottom: &mut [Blob<B>],
    ) -> Result<()> {
        check_blob_count(Self::TYPE, "bottom", 2, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())?;
        check_propagate_down(Self::TYPE, propagate_down, bottom.len())?;
        Self::checked_top_shape(bottom, &top[0])?;
        if !propagate_down.iter().any(|flag| *flag) {
            return Ok(());
        }
        tracing::trace!(layer = %self.name, ?propagate_down, "backward");

        let gradients = bilinear::backward(
            bottom[GRID].data().clone(),
            bottom[SOURCE].data().clone(),
            top[0].grad().clone(),
            propagate_down[GRID],
            propagate_down[SOURCE],
        );
        if let Some(delta) = gradients.grid {
            bottom[GRID].accumulate_grad(delta)?;
        }
        if let Some(delta) = gradients.source {
            bottom[SOURCE].accumulate_grad(delta)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_reshape_uses_grid_spatial_extent() {
        let device = Default::default();
        let grid = Blob::<Backend>::zeros([2, 2, 3, 5], &device);
        let source = Blob::<Backend>::zeros([2, 4, 7, 7], &device);
        let bottom = vec![grid, source];
        let mut top = vec![Blob::new(&device)];

        let mut layer = BilinearSamplerLayer::new();
        Layer::<Backend>::reshape(&mut layer, &bottom, &mut top).unwrap();
        assert_eq!(top[0].shape(), [2, 4, 3, 5]);
    }

    #[test]
    fn test_reshape_rejects_bad_grid() {
        let device = Default::default();
        let bottom = vec![
            Blob::<Backend>::zeros([1, 3, 2, 2], &device),
            Blob::<Backend>::zeros([1, 1, 4, 4], &device),
        ];
        let mut top = vec![Blob::new(&device)];
        let mut layer = BilinearSamplerLayer::new();
        let err = Layer::<Backend>::reshape(&mut layer, &bottom, &mut top).unwrap_err();
        assert!(matches!(err, LayerError::DimensionMismatch(_)));

        let bottom = vec![
            Blob::<Backend>::zeros([2, 2, 2, 2], &device),
            Blob::<Backend>::zeros([1, 1, 4, 4], &device),
        ];
        assert!(Layer::<Backend>::reshape(&mut layer, &bottom, &mut top).is_err());
    }

    #[test]
    fn test_backward_respects_propagate_down() {
        let device = Default::default();
        let grid = Blob::<Backend>::from_vec(vec![0.3, -0.2], [1, 2, 1, 1], &device).unwrap();
        let source = Blob::<Backend>::from_vec((0..16).map(|v| v as f32).collect(), [1, 1, 4, 4], &device).unwrap();
        let mut bottom = vec![grid, source];
        let mut top = vec![Blob::new(&device)];

        let mut layer = BilinearSamplerLayer::new();
        Layer::<Backend>::reshape(&mut layer, &bottom, &mut top).unwrap();
        Layer::<Backend>::forward(&mut layer, &bottom, &mut top).unwrap();
        top[0].write_grad(vec![1.0]).unwrap();

        Layer::<Backend>::backward(&mut layer, &top, &[false, true], &mut bottom).unwrap();
        assert!(bottom[GRID].grad_vec().unwrap().iter().all(|v| *v == 0.0));
        let source_grad: f32 = bottom[SOURCE].grad_vec().unwrap().iter().sum();
        assert!((source_grad - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_stale_top_is_shape_mismatch() {
        let device = Default::default();
        let mut bottom = vec![
            Blob::<Backend>::zeros([1, 2, 2, 2], &device),
            Blob::<Backend>::zeros([1, 1, 4, 4], &device),
        ];
        // Never reshaped: still the 1×1×1×1 placeholder.
        let mut top = vec![Blob::new(&device)];
        let mut layer = BilinearSamplerLayer::new();

        let err = Layer::<Backend>::forward(&mut layer, &bottom, &mut top).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
        let err = Layer::<Backend>::backward(&mut layer, &top, &[true, true], &mut bottom).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_passes_validate_inputs_after_bottom_change() {
        let device = Default::default();
        let mut bottom = vec![
            Blob::<Backend>::zeros([1, 2, 2, 2], &device),
            Blob::<Backend>::zeros([1, 1, 4, 4], &device),
        ];
        let mut top = vec![Blob::new(&device)];
        let mut layer = BilinearSamplerLayer::new();
        Layer::<Backend>::reshape(&mut layer, &bottom, &mut top).unwrap();

        // The grid grows a batch element the source does not have.
        bottom[GRID].reshape([2, 2, 2, 2]);
        top[0].reshape([2, 1, 2, 2]);
        let err = Layer::<Backend>::forward(&mut layer, &bottom, &mut top).unwrap_err();
        assert!(matches!(err, LayerError::DimensionMismatch(_)));
        let err = Layer::<Backend>::backward(&mut layer, &top, &[true, true], &mut bottom).unwrap_err();
        assert!(matches!(err, LayerError::DimensionMismatch(_)));
    }
}
