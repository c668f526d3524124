//! Bilinear sampling.
//!
//! This module provides the sampling kernels and the layer that exposes them
//! through the host layer contract.

pub mod bilinear;
pub mod layer;

pub use bilinear::SamplerGradients;
pub use layer::BilinearSamplerLayer;
