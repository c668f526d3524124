//! Differentiable bilinear sampling and the tensor layers around it.
//!
//! The bilinear sampler resamples a source feature map at positions given by
//! a normalized sampling grid, with gradients for both inputs. The grid
//! generator builds such a grid from pixel offsets; concat, slice, cut and
//! maxout cover the reshaping that surrounds a warping stage.

pub mod concat;
pub mod cut;
pub mod grid_generator;
pub mod maxout;
pub mod registry;
pub mod sampler;
pub mod slice;

pub use concat::ConcatLayer;
pub use cut::{CropPlan, CutLayer};
pub use grid_generator::{GridGeneratorLayer, GridScale};
pub use maxout::MaxoutLayer;
pub use registry::{LayerFactory, LayerRegistry};
pub use sampler::{BilinearSamplerLayer, SamplerGradients};
pub use slice::SliceLayer;
