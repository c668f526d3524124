//! Blob type holding a data plane and a gradient plane.
//!
//! Both planes are burn tensors of identical rank-4 shape. Layers exchange
//! whole tensors with a blob; the `Vec<f32>` accessors copy through host
//! memory and are meant for callers feeding or inspecting values.

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use super::shape::{self, Shape4, NUM_AXES};
use crate::error::{LayerError, Result};

/// Rank-4 tensor buffer with data and gradient accumulator.
///
/// # Type Parameters
/// * `B` - The backend the planes live on
///
/// # Examples
/// ```rust
/// use warpkit_core::Blob;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let mut blob = Blob::<Backend>::zeros([1, 2, 3, 3], &device);
/// assert_eq!(blob.count(), 18);
/// blob.reshape([1, 2, 4, 4]);
/// assert_eq!(blob.shape(), [1, 2, 4, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct Blob<B: Backend> {
    /// Primary values.
    data: Tensor<B, 4>,
    /// Gradient accumulator, same shape as `data`.
    grad: Tensor<B, 4>,
}

impl<B: Backend> Blob<B> {
    /// Create a 1×1×1×1 zero blob, to be resized by a layer's reshape.
    pub fn new(device: &B::Device) -> Self {
        Self::zeros([1, 1, 1, 1], device)
    }

    /// Create a blob with zeroed data and gradient.
    pub fn zeros(shape: Shape4, device: &B::Device) -> Self {
        Self {
            data: Tensor::zeros(shape, device),
            grad: Tensor::zeros(shape, device),
        }
    }

    /// Create a blob from row-major values.
    pub fn from_vec(values: Vec<f32>, shape: Shape4, device: &B::Device) -> Result<Self> {
        let expected = shape::count(&shape, 0, NUM_AXES);
        if values.len() != expected {
            return Err(LayerError::shape_mismatch(&[expected], &[values.len()]));
        }
        Ok(Self {
            data: Tensor::from_data(TensorData::new(values, shape.to_vec()), device),
            grad: Tensor::zeros(shape, device),
        })
    }

    /// Wrap an existing tensor as the data plane with a zeroed gradient.
    pub fn from_tensor(data: Tensor<B, 4>) -> Self {
        let grad = data.zeros_like();
        Self { data, grad }
    }

    /// Blob shape `[N, C, H, W]`.
    pub fn shape(&self) -> Shape4 {
        self.data.dims()
    }

    /// Extent of a single axis.
    pub fn shape_at(&self, axis: usize) -> usize {
        self.shape()[axis]
    }

    /// Number of axes (always 4).
    pub fn num_axes(&self) -> usize {
        NUM_AXES
    }

    /// Total element count.
    pub fn count(&self) -> usize {
        shape::count(&self.shape(), 0, NUM_AXES)
    }

    /// Element count of the axes in `start..end`.
    pub fn count_range(&self, start: usize, end: usize) -> usize {
        shape::count(&self.shape(), start, end)
    }

    /// Flat offset of the given (possibly partial) index.
    pub fn offset(&self, indices: &[usize]) -> usize {
        shape::offset(&self.shape(), indices)
    }

    /// Device both planes live on.
    pub fn device(&self) -> B::Device {
        self.data.device()
    }

    /// Resize the blob.
    ///
    /// Both planes are reallocated and zeroed only when the shape changes.
    pub fn reshape(&mut self, shape: Shape4) {
        if self.shape() == shape {
            return;
        }
        let device = self.device();
        self.data = Tensor::zeros(shape, &device);
        self.grad = Tensor::zeros(shape, &device);
    }

    /// Resize the blob to the shape of `other`.
    pub fn reshape_like(&mut self, other: &Blob<B>) {
        self.reshape(other.shape());
    }

    /// Data plane.
    pub fn data(&self) -> &Tensor<B, 4> {
        &self.data
    }

    /// Gradient plane.
    pub fn grad(&self) -> &Tensor<B, 4> {
        &self.grad
    }

    /// Replace the data plane with a tensor of the same shape.
    pub fn set_data(&mut self, data: Tensor<B, 4>) -> Result<()> {
        self.check_dims(&data)?;
        self.data = data;
        Ok(())
    }

    /// Replace the gradient plane with a tensor of the same shape.
    pub fn set_grad(&mut self, grad: Tensor<B, 4>) -> Result<()> {
        self.check_dims(&grad)?;
        self.grad = grad;
        Ok(())
    }

    /// Add `delta` into the gradient plane.
    pub fn accumulate_grad(&mut self, delta: Tensor<B, 4>) -> Result<()> {
        self.check_dims(&delta)?;
        self.grad = self.grad.clone() + delta;
        Ok(())
    }

    /// Copy the data plane to host memory.
    pub fn data_vec(&self) -> Result<Vec<f32>> {
        tensor_to_vec(&self.data)
    }

    /// Copy the gradient plane to host memory.
    pub fn grad_vec(&self) -> Result<Vec<f32>> {
        tensor_to_vec(&self.grad)
    }

    /// Overwrite the data plane.
    pub fn write_data(&mut self, values: Vec<f32>) -> Result<()> {
        self.data = self.tensor_from_vec(values)?;
        Ok(())
    }

    /// Overwrite the gradient plane.
    pub fn write_grad(&mut self, values: Vec<f32>) -> Result<()> {
        self.grad = self.tensor_from_vec(values)?;
        Ok(())
    }

    /// Reset the gradient plane to zero.
    pub fn zero_grad(&mut self) {
        self.grad = self.grad.zeros_like();
    }

    fn check_dims(&self, tensor: &Tensor<B, 4>) -> Result<()> {
        if tensor.dims() != self.shape() {
            return Err(LayerError::shape_mismatch(&self.shape(), &tensor.dims()));
        }
        Ok(())
    }

    fn tensor_from_vec(&self, values: Vec<f32>) -> Result<Tensor<B, 4>> {
        let shape = self.shape();
        if values.len() != self.count() {
            return Err(LayerError::shape_mismatch(&[self.count()], &[values.len()]));
        }
        Ok(Tensor::from_data(
            TensorData::new(values, shape.to_vec()),
            &self.device(),
        ))
    }
}

fn tensor_to_vec<B: Backend>(tensor: &Tensor<B, 4>) -> Result<Vec<f32>> {
    tensor
        .clone()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| LayerError::data(format!("{:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    #[test]
    fn test_reshape_keeps_contents_when_unchanged() {
        let device = Default::default();
        let mut blob = Blob::<Backend>::from_vec(vec![1.0, 2.0, 3.0, 4.0], [1, 1, 2, 2], &device).unwrap();
        blob.reshape([1, 1, 2, 2]);
        assert_eq!(blob.data_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        blob.reshape([1, 2, 2, 2]);
        assert_eq!(blob.count(), 8);
        assert!(blob.data_vec().unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let device = Default::default();
        let result = Blob::<Backend>::from_vec(vec![1.0, 2.0], [1, 1, 2, 2], &device);
        assert!(matches!(result, Err(LayerError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_accumulate_grad_adds() {
        let device = Default::default();
        let mut blob = Blob::<Backend>::zeros([1, 1, 1, 3], &device);
        let delta = |values: [f32; 3]| Tensor::<Backend, 4>::from_data(TensorData::new(values.to_vec(), [1, 1, 1, 3]), &device);
        blob.accumulate_grad(delta([1.0, 2.0, 3.0])).unwrap();
        blob.accumulate_grad(delta([0.5, 0.5, 0.5])).unwrap();
        assert_eq!(blob.grad_vec().unwrap(), vec![1.5, 2.5, 3.5]);

        blob.zero_grad();
        assert_eq!(blob.grad_vec().unwrap(), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_set_data_checks_shape() {
        let device = Default::default();
        let mut blob = Blob::<Backend>::zeros([1, 1, 2, 2], &device);
        let wrong = Tensor::<Backend, 4>::zeros([1, 1, 3, 3], &device);
        assert!(blob.set_data(wrong.clone()).is_err());
        assert!(blob.set_grad(wrong.clone()).is_err());
        assert!(blob.accumulate_grad(wrong).is_err());
    }
}
