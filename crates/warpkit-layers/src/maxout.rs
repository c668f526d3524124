//! Channel-group maxout.
//!
//! The `C` input channels are split into `num_output` groups of consecutive
//! channels; each output channel is the element-wise maximum over its group.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use warpkit_core::blob::shape::AXIS_CHANNEL;
use warpkit_core::layer::{check_min_blob_count, check_propagate_down};
use warpkit_core::{Blob, Layer, LayerError, LayerParameter, MaxoutParameter, Result, Shape4};

/// Axis of the grouped view `[N, K, G, H, W]` that holds the group members.
const GROUP_AXIS: usize = 2;

/// Shape of the grouped view `[N, K, G, H, W]` of an `[N, C, H, W]` input.
fn grouped(shape: Shape4, num_output: usize) -> [usize; 5] {
    let [batch, channels, height, width] = shape;
    [batch, num_output, channels / num_output, height, width]
}

/// Group maxima of `input` and the in-group index of each winner,
/// `[N, K, 1, H, W]`.
///
/// Ties resolve to the lowest channel of the group.
pub fn forward<B: Backend>(input: Tensor<B, 4>, num_output: usize) -> (Tensor<B, 4>, Tensor<B, 5, Int>) {
    let shape = input.dims();
    let [batch, _, height, width] = shape;
    let top_shape = [batch, num_output, height, width];
    if shape.contains(&0) {
        let device = input.device();
        return (
            Tensor::zeros(top_shape, &device),
            Tensor::zeros([batch, num_output, 1, height, width], &device),
        );
    }
    let (values, indices) = input
        .reshape(grouped(shape, num_output))
        .max_dim_with_indices(GROUP_AXIS);
    (values.reshape(top_shape), indices)
}

/// Route `top_grad` to the recorded winners; every other input position
/// receives zero.
pub fn backward<B: Backend>(top_grad: Tensor<B, 4>, indices: Tensor<B, 5, Int>, input_shape: Shape4) -> Tensor<B, 4> {
    let device = top_grad.device();
    if input_shape.contains(&0) {
        return Tensor::zeros(input_shape, &device);
    }
    let grouped_shape = grouped(input_shape, indices.dims()[1]);
    let [batch, num_output, _, height, width] = grouped_shape;
    Tensor::<B, 5>::zeros(grouped_shape, &device)
        .scatter(GROUP_AXIS, indices, top_grad.reshape([batch, num_output, 1, height, width]))
        .reshape(input_shape)
}

/// Winner indices of one bottom, recorded by forward.
#[derive(Debug, Clone)]
struct Winners<B: Backend> {
    indices: Tensor<B, 5, Int>,
    /// Shape of the bottom the indices were taken from.
    input_shape: Shape4,
}

/// Maxout layer; each bottom produces the top at the same position.
#[derive(Debug, Clone)]
pub struct MaxoutLayer<B: Backend> {
    name: String,
    param: MaxoutParameter,
    winners: Vec<Winners<B>>,
}

impl<B: Backend> MaxoutLayer<B> {
    pub const TYPE: &'static str = "Maxout";

    pub fn new(param: MaxoutParameter) -> Result<Self> {
        if param.num_output == 0 {
            return Err(LayerError::invalid_configuration("output number cannot be zero"));
        }
        Ok(Self {
            name: String::new(),
            param,
            winners: Vec::new(),
        })
    }

    /// Create a maxout layer; the maxout record is required.
    pub fn from_parameter(param: &LayerParameter) -> Result<Self> {
        let maxout = param.maxout.clone().ok_or_else(|| {
            LayerError::invalid_configuration(format!(
                "layer '{}' of type {} needs a maxout record",
                param.name,
                Self::TYPE
            ))
        })?;
        let mut layer = Self::new(maxout)?;
        layer.name = param.name.clone();
        Ok(layer)
    }

    fn top_shape(&self, input_shape: Shape4) -> Shape4 {
        let mut top_shape = input_shape;
        top_shape[AXIS_CHANNEL] = self.param.num_output;
        top_shape
    }

    fn output_shape(&self, bottom: &[Blob<B>]) -> Result<Shape4> {
        let input_shape = bottom[0].shape();
        if let Some(other) = bottom.iter().find(|b| b.shape() != input_shape) {
            return Err(LayerError::shape_mismatch(&input_shape, &other.shape()));
        }
        self.param.group_size(input_shape[AXIS_CHANNEL])?;
        Ok(self.top_shape(input_shape))
    }

    fn check_pairs(bottom: &[Blob<B>], top: &[Blob<B>]) -> Result<()> {
        check_min_blob_count(Self::TYPE, "bottom", 1, bottom.len())?;
        if top.len() != bottom.len() {
            return Err(LayerError::BlobCount {
                layer: Self::TYPE,
                role: "top",
                expected: bottom.len().to_string(),
                actual: top.len(),
            });
        }
        Ok(())
    }
}

impl<B: Backend> Layer<B> for MaxoutLayer<B> {
    fn layer_type(&self) -> &'static str {
        Self::TYPE
    }

    fn setup(&mut self, bottom: &[Blob<B>], top: &[Blob<B>]) -> Result<()> {
        Self::check_pairs(bottom, top)
    }

    fn reshape(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        Self::check_pairs(bottom, top)?;
        let top_shape = self.output_shape(bottom)?;
        tracing::debug!(layer = %self.name, num_output = self.param.num_output, ?top_shape, "reshape");
        for blob in top.iter_mut() {
            blob.reshape(top_shape);
        }
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        Self::check_pairs(bottom, top)?;
        let top_shape = self.output_shape(bottom)?;
        if let Some(output_blob) = top.iter().find(|t| t.shape() != top_shape) {
            return Err(LayerError::shape_mismatch(&top_shape, &output_blob.shape()));
        }
        tracing::trace!(layer = %self.name, "forward");

        let mut winners = Vec::with_capacity(bottom.len());
        for (input_blob, output_blob) in bottom.iter().zip(top.iter_mut()) {
            let (output, indices) = forward(input_blob.data().clone(), self.param.num_output);
            output_blob.set_data(output)?;
            winners.push(Winners {
                indices,
                input_shape: input_blob.shape(),
            });
        }
        self.winners = winners;
        Ok(())
    }

    fn backward(
        &mut self,
        top: &[Blob<B>],
        propagate_down: &[bool],
        bottom: &mut [Blob<B>],
    ) -> Result<()> {
        Self::check_pairs(bottom, top)?;
        check_propagate_down(Self::TYPE, propagate_down, bottom.len())?;
        if self.winners.len() != bottom.len() {
            return Err(LayerError::missing_state(format!(
                "{} backward needs the winner indices of a forward pass over {} bottom(s)",
                Self::TYPE,
                bottom.len()
            )));
        }
        for ((winners, input_blob), output_blob) in self.winners.iter().zip(bottom.iter()).zip(top.iter()) {
            if input_blob.shape() != winners.input_shape {
                return Err(LayerError::shape_mismatch(&winners.input_shape, &input_blob.shape()));
            }
            let top_shape = self.top_shape(winners.input_shape);
            if output_blob.shape() != top_shape {
                return Err(LayerError::shape_mismatch(&top_shape, &output_blob.shape()));
            }
        }
        tracing::trace!(layer = %self.name, ?propagate_down, "backward");

        for (i, output_blob) in top.iter().enumerate() {
            if !propagate_down[i] {
                continue;
            }
            let winners = &self.winners[i];
            let delta = backward(output_blob.grad().clone(), winners.indices.clone(), winners.input_shape);
            bottom[i].accumulate_grad(delta)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    fn tensor(values: Vec<f32>, shape: Shape4) -> Tensor<Backend, 4> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    fn host(tensor: Tensor<Backend, 4>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_forward_picks_group_maximum() {
        // 4 channels of one pixel, two groups of two.
        let (output, indices) = forward(tensor(vec![1.0, 3.0, 5.0, 2.0], [1, 4, 1, 1]), 2);
        assert_eq!(host(output), vec![3.0, 5.0]);
        assert_eq!(indices.into_data().to_vec::<i64>().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_ties_go_to_lowest_channel() {
        let (_, indices) = forward(tensor(vec![2.0, 2.0, 2.0], [1, 3, 1, 1]), 1);
        assert_eq!(indices.into_data().to_vec::<i64>().unwrap(), vec![0]);
    }

    #[test]
    fn test_backward_routes_to_winner() {
        let input_shape = [1, 4, 1, 1];
        let (_, indices) = forward(tensor(vec![1.0, 3.0, 5.0, 2.0], input_shape), 2);
        let delta = backward(tensor(vec![1.0, 2.0], [1, 2, 1, 1]), indices, input_shape);
        assert_eq!(host(delta), vec![0.0, 1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_backward_before_forward_is_missing_state() {
        let device = Default::default();
        let mut layer = MaxoutLayer::<Backend>::new(MaxoutParameter::new(1)).unwrap();
        let top = vec![Blob::<Backend>::zeros([1, 1, 1, 1], &device)];
        let mut bottom = vec![Blob::<Backend>::zeros([1, 2, 1, 1], &device)];
        let err = layer.backward(&top, &[true], &mut bottom).unwrap_err();
        assert!(matches!(err, LayerError::MissingState(_)));
    }

    #[test]
    fn test_backward_rejects_bottom_reshaped_since_forward() {
        let device = Default::default();
        let mut layer = MaxoutLayer::<Backend>::new(MaxoutParameter::new(1)).unwrap();
        let mut bottom = vec![Blob::<Backend>::from_vec(vec![1.0, 2.0], [1, 2, 1, 1], &device).unwrap()];
        let mut top = vec![Blob::new(&device)];
        layer.reshape(&bottom, &mut top).unwrap();
        layer.forward(&bottom, &mut top).unwrap();

        bottom[0].reshape([1, 2, 2, 2]);
        let err = layer.backward(&top, &[true], &mut bottom).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
        assert!(bottom[0].grad_vec().unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_indivisible_channels_fail_reshape() {
        let device = Default::default();
        let mut layer = MaxoutLayer::<Backend>::new(MaxoutParameter::new(2)).unwrap();
        let bottom = vec![Blob::<Backend>::zeros([1, 3, 2, 2], &device)];
        let mut top = vec![Blob::new(&device)];
        let err = layer.reshape(&bottom, &mut top).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_zero_outputs_rejected() {
        assert!(MaxoutLayer::<Backend>::new(MaxoutParameter::new(0)).is_err());
        let param = LayerParameter::new("m", MaxoutLayer::<Backend>::TYPE);
        assert!(MaxoutLayer::<Backend>::from_parameter(&param).is_err());
    }
}
