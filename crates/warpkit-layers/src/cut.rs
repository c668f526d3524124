//! Cropping along every axis from a start axis on.
//!
//! `"Cut"` emits two crops of the same size: the primary one at the
//! configured offsets and a secondary one shifted along the halved axis.
//! `"Cutwo"` emits only the primary crop.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use warpkit_core::layer::check_blob_count;
use warpkit_core::{Blob, CutParameter, Layer, LayerError, LayerParameter, Result, Shape4, NUM_AXES};

use crate::slice::window;

/// Source/destination geometry of one crop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropPlan {
    /// Input shape.
    pub src_shape: Shape4,
    /// Output shape.
    pub dst_shape: Shape4,
    /// Per-axis start of the crop in the input.
    pub offsets: Shape4,
}

impl CropPlan {
    /// Build a plan, rejecting crops that reach past the input.
    pub fn new(src_shape: Shape4, dst_shape: Shape4, offsets: Shape4) -> Result<Self> {
        for axis in 0..NUM_AXES {
            if offsets[axis] + dst_shape[axis] > src_shape[axis] {
                return Err(LayerError::invalid_configuration(format!(
                    "the crop for axis {} is out of bounds: size {} at offset {} exceeds extent {}",
                    axis, dst_shape[axis], offsets[axis], src_shape[axis]
                )));
            }
        }
        Ok(Self {
            src_shape,
            dst_shape,
            offsets,
        })
    }

    /// Crop `input`, which must have `src_shape`.
    pub fn apply<B: Backend>(&self, input: &Tensor<B, 4>) -> Tensor<B, 4> {
        window(input, &self.offsets, self.dst_shape)
    }
}

/// Cut layer, paired (`"Cut"`) or single-output (`"Cutwo"`).
#[derive(Debug, Clone)]
pub struct CutLayer {
    name: String,
    param: CutParameter,
    paired: bool,
}

impl CutLayer {
    pub const TYPE: &'static str = "Cut";
    pub const SINGLE_TYPE: &'static str = "Cutwo";

    /// Two-output cut.
    pub fn paired(param: CutParameter) -> Self {
        Self {
            name: String::new(),
            param,
            paired: true,
        }
    }

    /// Single-output cut.
    pub fn single(param: CutParameter) -> Self {
        Self {
            name: String::new(),
            param,
            paired: false,
        }
    }

    pub fn from_parameter(param: &LayerParameter) -> Result<Self> {
        let cut = param.cut.clone().unwrap_or_default();
        let mut layer = if param.layer_type == Self::SINGLE_TYPE {
            Self::single(cut)
        } else {
            Self::paired(cut)
        };
        layer.name = param.name.clone();
        Ok(layer)
    }

    fn type_name(&self) -> &'static str {
        if self.paired {
            Self::TYPE
        } else {
            Self::SINGLE_TYPE
        }
    }

    fn top_count(&self) -> usize {
        if self.paired {
            2
        } else {
            1
        }
    }

    /// Crop plans for the outputs, primary first.
    pub fn plans(&self, input_shape: Shape4) -> Result<Vec<CropPlan>> {
        let start_axis = self.param.resolved_axis(NUM_AXES)?;
        if let Some(halve) = self.param.halve_axis {
            if halve >= NUM_AXES {
                return Err(LayerError::invalid_configuration(format!(
                    "halve_axis {} out of range for a {}-axis blob",
                    halve, NUM_AXES
                )));
            }
        }
        let halved = self.param.halve_axis.filter(|axis| *axis >= start_axis);

        let mut output_shape = input_shape;
        let mut primary = [0; NUM_AXES];
        let mut secondary = [0; NUM_AXES];
        for axis in 0..NUM_AXES {
            primary[axis] = self.param.offset_for(axis, start_axis);
            if halved == Some(axis) {
                output_shape[axis] = input_shape[axis] / 2;
                secondary[axis] = self.param.second_offset.unwrap_or(output_shape[axis]);
            }
        }

        let mut plans = vec![CropPlan::new(input_shape, output_shape, primary)?];
        if self.paired {
            plans.push(CropPlan::new(input_shape, output_shape, secondary)?);
        }
        Ok(plans)
    }
}

impl<B: Backend> Layer<B> for CutLayer {
    fn layer_type(&self) -> &'static str {
        self.type_name()
    }

    fn setup(&mut self, bottom: &[Blob<B>], top: &[Blob<B>]) -> Result<()> {
        check_blob_count(self.type_name(), "bottom", 1, bottom.len())?;
        check_blob_count(self.type_name(), "top", self.top_count(), top.len())?;
        self.param.resolved_axis(NUM_AXES).map(|_| ())
    }

    fn reshape(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        check_blob_count(self.type_name(), "bottom", 1, bottom.len())?;
        check_blob_count(self.type_name(), "top", self.top_count(), top.len())?;
        let plans = self.plans(bottom[0].shape())?;
        tracing::debug!(
            layer = %self.name,
            output_shape = ?plans[0].dst_shape,
            offsets = ?plans.iter().map(|p| p.offsets).collect::<Vec<_>>(),
            "reshape"
        );
        if plans[0].dst_shape.contains(&0) {
            tracing::warn!(layer = %self.name, input_shape = ?bottom[0].shape(), "cut output is empty");
        }
        for (blob, plan) in top.iter_mut().zip(plans.iter()) {
            blob.reshape(plan.dst_shape);
        }
        Ok(())
    }

    fn forward(&mut self, bottom: &[Blob<B>], top: &mut [Blob<B>]) -> Result<()> {
        check_blob_count(self.type_name(), "bottom", 1, bottom.len())?;
        check_blob_count(self.type_name(), "top", self.top_count(), top.len())?;
        let plans = self.plans(bottom[0].shape())?;
        tracing::trace!(layer = %self.name, "forward");

        for (blob, plan) in top.iter().zip(plans.iter()) {
            if blob.shape() != plan.dst_shape {
                return Err(LayerError::shape_mismatch(&plan.dst_shape, &blob.shape()));
            }
        }
        for (blob, plan) in top.iter_mut().zip(plans.iter()) {
            blob.set_data(plan.apply(bottom[0].data()))?;
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
