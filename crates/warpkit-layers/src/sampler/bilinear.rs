//! Bilinear sampling kernels.
//!
//! The forward kernel resamples a source feature map `[N, C, Hs, Ws]` at the
//! positions given by a normalized grid `[N, 2, Ho, Wo]`, producing
//! `[N, C, Ho, Wo]`. The backward kernel returns the gradients of the source
//! and of the grid.
//!
//! Corners falling outside the source extent read as zero and receive no
//! gradient (zero padding). Corner values are read with `gather` on the
//! flattened source planes and gradients are routed back with `scatter`.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use warpkit_core::blob::shape::{AXIS_BATCH, AXIS_CHANNEL, AXIS_HEIGHT, AXIS_WIDTH};
use warpkit_core::Shape4;

/// Grid channel holding normalized x coordinates.
pub const GRID_X_CHANNEL: usize = 0;
/// Grid channel holding normalized y coordinates.
pub const GRID_Y_CHANNEL: usize = 1;
/// Number of channels of a sampling grid.
pub const GRID_CHANNELS: usize = 2;

/// Normalized coordinate addressing source index 0.
pub const GRID_MIN: f32 = -1.0;
/// Normalized coordinate addressing source index `dim - 1`.
pub const GRID_MAX: f32 = 1.0;

/// Normalized coordinates are clamped to `[-GRID_CLAMP, GRID_CLAMP]` before
/// rescaling. Beyond it every corner of a plane at least two pixels wide is
/// out of bounds, so results are unchanged and pixel coordinates stay finite.
pub const GRID_CLAMP: f32 = 4.0;

/// Corner offsets `(dx, dy)` from the top-left anchor `(x0, y0)`.
///
/// Order: top-left, top-right, bottom-left, bottom-right. Every array of
/// per-corner values in this module follows this order.
pub const CORNER_OFFSETS: [(f32, f32); 4] = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)];

/// Scale of the affine map from normalized to pixel coordinates, `(dim - 1) / 2`.
#[inline]
pub fn pixel_scale(extent: usize) -> f32 {
    (extent as f32 - 1.0) / 2.0
}

/// Map normalized coordinates to pixel space: `(norm + 1) * (dim - 1) / 2`.
pub fn to_pixel<B: Backend, const D: usize>(normalized: Tensor<B, D>, extent: usize) -> Tensor<B, D> {
    normalized.sub_scalar(GRID_MIN).mul_scalar(pixel_scale(extent))
}

/// Output shape of the sampler: `[grid.N, source.C, grid.H, grid.W]`.
pub fn output_shape(grid: Shape4, source: Shape4) -> Shape4 {
    [
        grid[AXIS_BATCH],
        source[AXIS_CHANNEL],
        grid[AXIS_HEIGHT],
        grid[AXIS_WIDTH],
    ]
}

/// One channel of a grid-shaped tensor, `[N, 1, H, W]`.
pub fn grid_channel<B: Backend>(grid: &Tensor<B, 4>, channel: usize) -> Tensor<B, 4> {
    let [batch, _, height, width] = grid.dims();
    grid.clone()
        .slice([0..batch, channel..channel + 1, 0..height, 0..width])
}

/// 1 where `coord` lies in `[0, extent)`, 0 elsewhere.
fn inside<B: Backend>(coord: Tensor<B, 3>, extent: usize) -> Tensor<B, 3> {
    let lower = coord.clone().greater_equal_elem(0.0).int();
    let upper = coord.lower_elem(extent as f32).int();
    (lower * upper).float()
}

/// One neighbour of every sampling position.
#[derive(Debug, Clone)]
struct Corner<B: Backend> {
    /// Flat in-plane offset, clamped into the plane.
    offset: Tensor<B, 3, Int>,
    /// 1 where the neighbour lies inside the plane, 0 elsewhere.
    mask: Tensor<B, 3>,
}

/// Sampling positions resolved against the source planes.
///
/// Every tensor is laid out `[N, 1, Ho * Wo]` so it broadcasts across the
/// source channels.
#[derive(Debug, Clone)]
struct Corners<B: Backend> {
    /// Top-left weight along x, `1 - frac(x)`.
    wx: Tensor<B, 3>,
    /// Top-left weight along y, `1 - frac(y)`.
    wy: Tensor<B, 3>,
    corners: [Corner<B>; 4],
}

impl<B: Backend> Corners<B> {
    fn resolve(grid: Tensor<B, 4>, height: usize, width: usize) -> Self {
        let [batch, _, out_h, out_w] = grid.dims();
        let points = out_h * out_w;
        let grid = grid.clamp(-GRID_CLAMP, GRID_CLAMP);
        let x = to_pixel(grid_channel(&grid, GRID_X_CHANNEL), width).reshape([batch, 1, points]);
        let y = to_pixel(grid_channel(&grid, GRID_Y_CHANNEL), height).reshape([batch, 1, points]);

        let x0 = x.clone().floor();
        let y0 = y.clone().floor();
        let wx = x0.clone().sub(x).add_scalar(1.0);
        let wy = y0.clone().sub(y).add_scalar(1.0);

        let corners = CORNER_OFFSETS.map(|(dx, dy)| {
            let cx = x0.clone().add_scalar(dx);
            let cy = y0.clone().add_scalar(dy);
            let mask = inside(cx.clone(), width) * inside(cy.clone(), height);
            let offset = cy.clamp(0.0, (height - 1) as f32).int().mul_scalar(width as i32)
                + cx.clamp(0.0, (width - 1) as f32).int();
            Corner { offset, mask }
        });

        Self { wx, wy, corners }
    }

    /// Bilinear weights of the four corners.
    fn weights(&self) -> [Tensor<B, 3>; 4] {
        let (wx, wy) = (self.wx.clone(), self.wy.clone());
        let ux = wx.clone().neg().add_scalar(1.0);
        let uy = wy.clone().neg().add_scalar(1.0);
        [wy.clone() * wx.clone(), wy * ux.clone(), uy.clone() * wx, uy * ux]
    }

    /// Corner values of every channel of `planes` (`[N, C, Hs * Ws]`), zero
    /// where out of bounds.
    fn read(&self, planes: &Tensor<B, 3>) -> [Tensor<B, 3>; 4] {
        let [_, channels, _] = planes.dims();
        std::array::from_fn(|k| {
            let corner = &self.corners[k];
            let index = corner.offset.clone().repeat(&[1, channels, 1]);
            planes.clone().gather(2, index) * corner.mask.clone()
        })
    }

    /// Partial derivatives of the interpolated value with respect to the
    /// pixel-space position, `(d/dx_real, d/dy_real)`.
    ///
    /// The top-left weights fall as the position grows, hence the negation.
    fn position_derivatives(&self, values: [Tensor<B, 3>; 4]) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [tl, tr, bl, br] = values;
        let cross = tl - tr.clone() - bl.clone() + br.clone();
        let d_x = (bl - br.clone() + cross.clone() * self.wy.clone()).neg();
        let d_y = (tr - br + cross * self.wx.clone()).neg();
        (d_x, d_y)
    }
}

/// Resample `source` at the grid positions.
///
/// The grid and source batches must agree; the result has
/// `output_shape(grid.dims(), source.dims())`.
pub fn forward<B: Backend>(grid: Tensor<B, 4>, source: Tensor<B, 4>) -> Tensor<B, 4> {
    let top_shape = output_shape(grid.dims(), source.dims());
    let [batch, channels, src_h, src_w] = source.dims();
    if top_shape.contains(&0) || src_h * src_w == 0 {
        return Tensor::zeros(top_shape, &source.device());
    }

    let corners = Corners::resolve(grid, src_h, src_w);
    let planes = source.reshape([batch, channels, src_h * src_w]);
    let [tl, tr, bl, br] = corners.read(&planes);
    let [w_tl, w_tr, w_bl, w_br] = corners.weights();
    let output = tl * w_tl + tr * w_tr + bl * w_bl + br * w_br;
    output.reshape(top_shape)
}

/// Gradients of the sampler inputs; `None` where not requested.
#[derive(Debug, Clone)]
pub struct SamplerGradients<B: Backend> {
    pub grid: Option<Tensor<B, 4>>,
    pub source: Option<Tensor<B, 4>>,
}

/// Gradients of the sampler given the output gradient `top_grad`.
///
/// The grid gradient sums the contributions of every channel since all
/// channels share one coordinate per output position.
pub fn backward<B: Backend>(
    grid: Tensor<B, 4>,
    source: Tensor<B, 4>,
    top_grad: Tensor<B, 4>,
    need_grid: bool,
    need_source: bool,
) -> SamplerGradients<B> {
    let grid_shape = grid.dims();
    let source_shape = source.dims();
    let [batch, channels, src_h, src_w] = source_shape;
    let [_, _, out_h, out_w] = output_shape(grid_shape, source_shape);
    let device = source.device();
    if batch * channels * out_h * out_w == 0 || src_h * src_w == 0 {
        return SamplerGradients {
            grid: need_grid.then(|| Tensor::zeros(grid_shape, &device)),
            source: need_source.then(|| Tensor::zeros(source_shape, &device)),
        };
    }

    let corners = Corners::resolve(grid, src_h, src_w);
    let top_grad = top_grad.reshape([batch, channels, out_h * out_w]);

    let source_grad = need_source.then(|| {
        let mut planes = Tensor::<B, 3>::zeros([batch, channels, src_h * src_w], &device);
        for (corner, weight) in corners.corners.iter().zip(corners.weights()) {
            let index = corner.offset.clone().repeat(&[1, channels, 1]);
            let contribution = top_grad.clone() * weight * corner.mask.clone();
            planes = planes.scatter(2, index, contribution);
        }
        planes.reshape(source_shape)
    });

    let grid_grad = need_grid.then(|| {
        let planes = source.reshape([batch, channels, src_h * src_w]);
        let (d_x, d_y) = corners.position_derivatives(corners.read(&planes));
        let grad_x = (top_grad.clone() * d_x).sum_dim(1).mul_scalar(pixel_scale(src_w));
        let grad_y = (top_grad.clone() * d_y).sum_dim(1).mul_scalar(pixel_scale(src_h));
        Tensor::cat(vec![grad_x, grad_y], 1).reshape(grid_shape)
    });

    SamplerGradients {
        grid: grid_grad,
        source: source_grad,
    }
}
