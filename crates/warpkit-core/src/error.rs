//! Error types for layer operations.
//!
//! Configuration problems and unimplemented gradient paths are reported
//! through [`LayerError`]. Sampling outside the source extent is defined
//! zero-padding behaviour and never produces an error.

use thiserror::Error;

/// Main error type for layer setup, shape inference and execution.
#[derive(Error, Debug)]
pub enum LayerError {
    /// Malformed layer configuration (axis, offsets, split points, group counts).
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Shape mismatch between blobs or between a blob and a buffer.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Dimension mismatch on a single axis.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Wrong number of bottom or top blobs handed to a layer.
    #[error("{layer} expects {expected} {role} blob(s), got {actual}")]
    BlobCount {
        layer: &'static str,
        role: &'static str,
        expected: String,
        actual: usize,
    },

    /// A pass the layer deliberately does not provide.
    #[error("{layer}: {pass} pass is not implemented")]
    NotImplemented {
        layer: &'static str,
        pass: &'static str,
    },

    /// State recorded by an earlier pass is missing.
    #[error("Missing state: {0}")]
    MissingState(String),

    /// No factory registered under the requested type name.
    #[error("Unknown layer type: {0}")]
    UnknownLayerType(String),

    /// Tensor data could not be converted to host values.
    #[error("Tensor data error: {0}")]
    Data(String),
}

/// Result type for layer operations.
pub type Result<T> = std::result::Result<T, LayerError>;

impl LayerError {
    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(msg: impl Into<String>) -> Self {
        Self::DimensionMismatch(msg.into())
    }

    /// Create a shape mismatch error from two shapes.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a not-implemented error, also emitted at `error` level.
    pub fn not_implemented(layer: &'static str, pass: &'static str) -> Self {
        tracing::error!(layer, pass, "invoked a pass that is not implemented");
        Self::NotImplemented { layer, pass }
    }

    /// Create a missing state error.
    pub fn missing_state(msg: impl Into<String>) -> Self {
        Self::MissingState(msg.into())
    }

    /// Create a tensor data error.
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Whether the error signals a malformed model definition rather than a
    /// runtime condition.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_)
                | Self::ShapeMismatch { .. }
                | Self::DimensionMismatch(_)
                | Self::BlobCount { .. }
                | Self::UnknownLayerType(_)
        )
    }
}
