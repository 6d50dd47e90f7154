use anyhow::Result;

use crate::gallery::Encoding;

/// Face encoder trait.
///
/// Implementations are shared between request threads, so `encode` takes
/// `&self` and must not keep per-call state.
pub trait FaceEncoder: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Encodes the first face found in `image`.
    ///
    /// Returns `Ok(None)` when the image holds no usable face; errors are
    /// reserved for images that cannot be decoded at all.
    fn encode(&self, image: &[u8]) -> Result<Option<Encoding>>;
}
