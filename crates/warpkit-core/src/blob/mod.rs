//! Blob types and shape arithmetic.
//!
//! This module provides the rank-4 tensor buffer layers read from and
//! write into, together with the index arithmetic shared by all layers.

pub mod blob;
pub mod shape;

pub use blob::Blob;
pub use shape::{canonical_axis, Shape4, NUM_AXES};
