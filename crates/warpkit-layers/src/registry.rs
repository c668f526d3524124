//! Type-name to layer-constructor lookup.

use std::collections::HashMap;

use burn::tensor::backend::Backend;
use warpkit_core::{Layer, LayerError, LayerParameter, Result};

use crate::concat::ConcatLayer;
use crate::cut::CutLayer;
use crate::grid_generator::GridGeneratorLayer;
use crate::maxout::MaxoutLayer;
use crate::sampler::BilinearSamplerLayer;
use crate::slice::SliceLayer;

/// Builds a layer from its descriptor.
pub type LayerFactory<B> = fn(&LayerParameter) -> Result<Box<dyn Layer<B>>>;

/// Registry of layer factories keyed by type name.
///
/// Registration is open: callers may add their own types or replace a
/// built-in one under the same name.
pub struct LayerRegistry<B: Backend> {
    factories: HashMap<String, LayerFactory<B>>,
}

impl<B: Backend> LayerRegistry<B> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every layer this crate provides.
    pub fn with_builtin_layers() -> Self {
        let mut registry = Self::new();
        registry.register(BilinearSamplerLayer::TYPE, build_sampler::<B>);
        registry.register(GridGeneratorLayer::TYPE, build_grid_generator::<B>);
        registry.register(ConcatLayer::TYPE, build_concat::<B>);
        registry.register(SliceLayer::TYPE, build_slice::<B>);
        registry.register(SliceLayer::SEGMENT_TYPE, build_slice::<B>);
        registry.register(CutLayer::TYPE, build_cut::<B>);
        registry.register(CutLayer::SINGLE_TYPE, build_cut::<B>);
        registry.register(MaxoutLayer::<B>::TYPE, build_maxout::<B>);
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, factory: LayerFactory<B>) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::debug!(layer_type = %name, "replaced layer factory");
        }
    }

    /// Build the layer described by `param`.
    pub fn create(&self, param: &LayerParameter) -> Result<Box<dyn Layer<B>>> {
        let factory = self
            .factories
            .get(&param.layer_type)
            .ok_or_else(|| LayerError::UnknownLayerType(param.layer_type.clone()))?;
        tracing::debug!(name = %param.name, layer_type = %param.layer_type, "creating layer");
        factory(param)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered type names, sorted.
    pub fn layer_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<B: Backend> Default for LayerRegistry<B> {
    fn default() -> Self {
        Self::with_builtin_layers()
    }
}

impl<B: Backend> std::fmt::Debug for LayerRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("layer_types", &self.layer_types())
            .finish()
    }
}

fn build_sampler<B: Backend>(param: &LayerParameter) -> Result<Box<dyn Layer<B>>> {
    Ok(Box::new(BilinearSamplerLayer::from_parameter(param)?))
}

fn build_grid_generator<B: Backend>(param: &LayerParameter) -> Result<Box<dyn Layer<B>>> {
    Ok(Box::new(GridGeneratorLayer::from_parameter(param)?))
}

fn build_concat<B: Backend>(param: &LayerParameter) -> Result<Box<dyn Layer<B>>> {
    Ok(Box::new(ConcatLayer::from_parameter(param)?))
}

fn build_slice<B: Backend>(param: &LayerParameter) -> Result<Box<dyn Layer<B>>> {
    Ok(Box::new(SliceLayer::from_parameter(param)?))
}

fn build_cut<B: Backend>(param: &LayerParameter) -> Result<Box<dyn Layer<B>>> {
    Ok(Box::new(CutLayer::from_parameter(param)?))
}

fn build_maxout<B: Backend>(param: &LayerParameter) -> Result<Box<dyn Layer<B>>> {
    Ok(Box::new(MaxoutLayer::<B>::from_parameter(param)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use warpkit_core::MaxoutParameter;

    type Backend = NdArray<f32>;

    #[test]
    fn test_builtin_layer_types() {
        let registry = LayerRegistry::<Backend>::with_builtin_layers();
        assert_eq!(
            registry.layer_types(),
            vec!["BilinearSampler", "Concat", "Cut", "Cutwo", "GridGenerator", "Maxout", "Slice", "Sliceseg"]
        );
    }

    #[test]
    fn test_create_keeps_variant() {
        let registry = LayerRegistry::<Backend>::with_builtin_layers();
        let layer = registry.create(&LayerParameter::new("c", "Cutwo")).unwrap();
        assert_eq!(layer.layer_type(), "Cutwo");
        let layer = registry.create(&LayerParameter::new("s", "Sliceseg")).unwrap();
        assert_eq!(layer.layer_type(), "Sliceseg");
        let layer = registry
            .create(&LayerParameter::new("m", "Maxout").with_maxout(MaxoutParameter::new(2)))
            .unwrap();
        assert_eq!(layer.layer_type(), "Maxout");
    }

    #[test]
    fn test_unknown_type() {
        let registry = LayerRegistry::<Backend>::new();
        let err = registry.create(&LayerParameter::new("x", "Softmax")).unwrap_err();
        assert!(matches!(err, LayerError::UnknownLayerType(name) if name == "Softmax"));
    }

    #[test]
    fn test_open_registration() {
        let mut registry = LayerRegistry::<Backend>::new();
        assert!(!registry.contains("Warp"));
        registry.register("Warp", build_sampler::<Backend>);
        assert!(registry.contains("Warp"));
        let layer = registry.create(&LayerParameter::new("w", "Warp")).unwrap();
        assert_eq!(layer.layer_type(), BilinearSamplerLayer::TYPE);
    }
}
