use anyhow::{anyhow, Context, Result};

use crate::encode::backend::FaceEncoder;
use crate::gallery::Encoding;

/// Stub backend for testing. The "image" is a comma or whitespace separated
/// list of numbers which is returned verbatim as the encoding.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubEncoder;

impl FaceEncoder for StubEncoder {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn encode(&self, image: &[u8]) -> Result<Option<Encoding>> {
        let text = std::str::from_utf8(image).context("stub encoder expects utf-8 input")?;
        let values = text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|value| !value.is_empty())
            .map(|value| {
                value
                    .parse::<f32>()
                    .map_err(|_| anyhow!("stub encoder: '{}' is not a number", value))
            })
            .collect::<Result<Vec<f32>>>()?;
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values))
    }
}
