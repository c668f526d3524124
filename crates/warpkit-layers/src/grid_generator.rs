//! Sampling grid generation from pixel offsets.
//!
//! Converts a flow field `(N, 2, H, W)` of pixel displacements into the
//! normalized sampling grid the bilinear sampler consumes:
//!
//! ```text
//! grid[n, 0, h, w] = (flow[n, 0, h, w] + w) / ((W - 1) / 2) - 1
//! grid[n, 1, h, w] = (flow[n, 1, h, w] + h) / ((H - 1) / 2) - 1
//! ```

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use warpkit_core::blob::shape::{AXIS_CHANNEL, AXIS_HEIGHT, AXIS_WIDTH};
use warpkit_core::layer::{check_blob_count, check_propagate_down};
use warpkit_core::{Blob, Layer, LayerError, LayerParameter, Result, Shape4};

use crate::sampler::bilinear::{grid_channel, pixel_scale, GRID_CHANNELS, GRID_MIN, GRID_X_CHANNEL, GRID_Y_CHANNEL};

/// Per-call scale of the pixel-to-normalized map, one factor per grid channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridScale {
    /// `(W - 1) / 2`
    pub x: f32,
    /// `(H - 1) / 2`
    pub y: f32,
}

impl GridScale {
    /// Scale for a flow field of `shape`.
    ///
    /// Extents below 2 would divide by zero and are rejected.
    pub fn for_shape(shape: Shape4) -> Result<Self> {
        let (height, width) = (shape[AXIS_HEIGHT], shape[AXIS_WIDTH]);
        if height < 2 || width < 2 {
            return Err(LayerError::invalid_configuration(format!(
                "grid generation needs at least 2×2 positions, got {}×{}",
                height, width
            )));
        }
        Ok(Self {
            x: pixel_scale(width),
            y: pixel_scale(height),
        })
    }
}

/// Identity grid `[1, 2, H, W]` in pixel units: `(w, h)` at every position.
fn pixel_base<B: Backend>(height: usize, width: usize, device: &B::Device) -> Tensor<B, 4> {
    let xs = Tensor::<B, 1, Int>::arange(0..width as i64, device)
        .float()
        .reshape([1, 1, 1, width])
        .repeat(&[1, 1, height, 1]);
    let ys = Tensor::<B, 1, Int>::arange(0..height as i64, device)
        .float()
        .reshape([1, 1, height, 1])
        .repeat(&[1, 1, 1, width]);
    Tensor::cat(vec![xs, ys], 1)
}

/// Divide each grid channel of `field` by its scale factor.
fn unscale<B: Backend>(field: Tensor<B, 4>, scale: GridScale) -> Tensor<B, 4> {
    let x = grid_channel(&field, GRID_X_CHANNEL).div_scalar(scale.x);
    let y = grid_channel(&field, GRID_Y_CHANNEL).div_scalar(scale.y);
    Tensor::cat(vec![x, y], 1)
}

/// Normalized sampling grid for `flow`.
pub fn forward<B: Backend>(flow: Tensor<B, 4>, scale: GridScale) -> Tensor<B, 4> {
    let [_, _, height, width] = flow.dims();
    let base = pixel_base::<B>(height, width, &flow.device());
    unscale(flow + base, scale).add_scalar(GRID_MIN)
}

/// Gradient of the flow given the grid gradient `top_grad`.
pub fn backward<B: Backend>(top_grad: Tensor<B, 4>, scale: GridScale) -> Tensor<B, 4> {
    unscale(top_grad, scale)
}

/// Layer turning pixel offsets into a normalized sampling grid.
#[derive(Debug, Clone, Default)]
pub struct GridGeneratorLayer {
    name: String,
}

impl GridGeneratorLayer {
    pub const TYPE: &'static str = "GridGenerator";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parameter(param: &LayerParameter) -> Result<Self> {
        Ok(Self {
            name: param.name.clone(),
        })
    }

    fn checked_scale(shape: Shape4) -> Result<GridScale> {
        if shape[AXIS_CHANNEL] != GRID_CHANNELS {
            return Err(LayerError::dimension_mismatch(format!(
                "flow field must have {} channels, got {}",
                GRID_CHANNELS, shape[AXIS_CHANNEL]
            )));
        }
        GridScale::for_shape(shape)
    }
}

impl<B: Backend> Layer<B> for GridGeneratorLayer {
    fn layer_type(&self) -> &'static str {
        Self::TYPE
    }

    fn setup(&mut self, bottom: &[Blob<B>], top: &[Blob<B>]) -> Result<()> {
        check_blob_count(Self::TYPE, "bottom", 1, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())
    }

    fn reshape(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        check_blob_count(Self::TYPE, "bottom", 1, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())?;
        let shape = bottom[0].shape();
        Self::checked_scale(shape)?;
        tracing::debug!(layer = %self.name, ?shape, "reshape");
        top[0].reshape_like(&bottom[0]);
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        check_blob_count(Self::TYPE, "bottom", 1, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())?;
        let shape = bottom[0].shape();
        if top[0].shape() != shape {
            return Err(LayerError::shape_mismatch(&shape, &top[0].shape()));
        }
        let scale = Self::checked_scale(shape)?;
        tracing::trace!(layer = %self.name, "forward");

        top[0].set_data(forward(bottom[0].data().clone(), scale))
    }

    fn backward(
        &mut self,
        top: &[Blob<B>],
        propagate_down: &[bool],
        bottom: &mut [Blob<B>],
    ) -> Result<()> {
        check_blob_count(Self::TYPE, "bottom", 1, bottom.len())?;
        check_blob_count(Self::TYPE, "top", 1, top.len())?;
        check_propagate_down(Self::TYPE, propagate_down, bottom.len())?;
        if !propagate_down[0] {
            return Ok(());
        }
        let shape = bottom[0].shape();
        if top[0].shape() != shape {
            return Err(LayerError::shape_mismatch(&shape, &top[0].shape()));
        }
        let scale = Self::checked_scale(shape)?;
        tracing::trace!(layer = %self.name, "backward");

        bottom[0].accumulate_grad(backward(top[0].grad().clone(), scale))
    }
}
