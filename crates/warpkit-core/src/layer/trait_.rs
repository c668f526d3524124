//! Layer trait for the host framework contract.
//!
//! This module defines the Layer trait every layer implementation plugs into.

use burn::tensor::backend::Backend;

use crate::blob::Blob;
use crate::error::{LayerError, Result};

/// Layer contract: setup, shape inference, forward and backward.
///
/// The host calls [`Layer::reshape`] once per change of input shapes,
/// [`Layer::forward`] per batch and, while training, [`Layer::backward`].
/// A single call runs to completion on the calling thread.
///
/// # Type Parameters
/// * `B` - The backend the blobs live on
pub trait Layer<B: Backend>: std::fmt::Debug {
    /// Type name the layer is registered under.
    fn layer_type(&self) -> &'static str;

    /// Validate the configuration against the blob arity.
    fn setup(&mut self, _bottom: &[Blob<B>], _top: &[Blob<B>]) -> Result<()> {
        Ok(())
    }

    /// Infer and apply the shapes of every top blob.
    fn reshape(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()>;

    /// Compute the top data from the bottom data.
    ///
    /// Top data is overwritten, never accumulated.
    fn forward(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()>;

    /// Propagate top gradients into bottom gradients.
    ///
    /// # Arguments
    /// * `top` - Output blobs carrying the incoming gradient
    /// * `propagate_down` - One flag per bottom; unset bottoms are left untouched
    /// * `bottom` - Input blobs whose gradient planes are accumulated into
    fn backward(
        &mut self,
        top: &[Blob<B>],
        propagate_down: &[bool],
        bottom: &mut [Blob<B>],
    ) -> Result<()>;
}

/// Check that exactly `expected` blobs were supplied.
pub fn check_blob_count(
    layer: &'static str,
    role: &'static str,
    expected: usize,
    actual: usize,
) -> Result<()> {
    if actual != expected {
        return Err(LayerError::BlobCount {
            layer,
            role,
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Check that at least `minimum` blobs were supplied.
pub fn check_min_blob_count(
    layer: &'static str,
    role: &'static str,
    minimum: usize,
    actual: usize,
) -> Result<()> {
    if actual < minimum {
        return Err(LayerError::BlobCount {
            layer,
            role,
            expected: format!("at least {}", minimum),
            actual,
        });
    }
    Ok(())
}

/// Check that `propagate_down` carries one flag per bottom blob.
pub fn check_propagate_down(
    layer: &'static str,
    propagate_down: &[bool],
    bottom_count: usize,
) -> Result<()> {
    if propagate_down.len() != bottom_count {
        return Err(LayerError::dimension_mismatch(format!(
            "{}: {} propagate_down flags for {} bottom blobs",
            layer,
            propagate_down.len(),
            bottom_count
        )));
    }
    Ok(())
}
