//! Face encoding backends.
//!
//! Turning an image into a feature vector is an external capability; the
//! rest of the crate only sees the `FaceEncoder` trait. Two backends ship
//! in-tree:
//! - `thumbnail`: normalized grayscale thumbnail of the whole frame
//! - `stub`: parses the image body as a list of numbers (tests, benches)

mod backend;
mod backends;

use anyhow::{anyhow, Result};
use std::sync::Arc;

pub use backend::FaceEncoder;
pub use backends::{StubEncoder, ThumbnailEncoder};

/// Builds the backend selected by name in configuration.
pub fn encoder_for(name: &str) -> Result<Arc<dyn FaceEncoder>> {
    match name {
        "thumbnail" => Ok(Arc::new(ThumbnailEncoder::default())),
        "stub" => Ok(Arc::new(StubEncoder)),
        other => Err(anyhow!(
            "unknown encoder '{}'; expected 'thumbnail' or 'stub'",
            other
        )),
    }
}
