pub mod blob;
pub mod config;
pub mod error;
pub mod layer;

pub use blob::{Blob, Shape4, NUM_AXES};
pub use config::{ConcatParameter, CutParameter, LayerParameter, MaxoutParameter, SliceParameter};
pub use error::{LayerError, Result};
pub use layer::Layer;
