//! Layer contract.

pub mod trait_;

pub use trait_::{check_blob_count, check_min_blob_count, check_propagate_down, Layer};
