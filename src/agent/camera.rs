//! Image acquisition for the capture agent.
//!
//! - `HttpSnapshotCamera`: one JPEG per request from a camera's HTTP
//!   snapshot endpoint (ESP32-CAM `/capture` and similar)
//! - `FileCamera`: re-reads a local image file on every capture
//!
//! Captured bytes are handed straight to the upload; they are never logged.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub trait Camera: Send {
    fn capture(&mut self) -> Result<Vec<u8>>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn capture(&mut self) -> Result<Vec<u8>> {
        (**self).capture()
    }
}

/// Builds a camera from a source string: `http(s)://` snapshot URL,
/// `file://` URL, or a plain local path.
pub fn camera_for(source: &str, timeout: Duration) -> Result<Box<dyn Camera>> {
    match Url::parse(source) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Box::new(HttpSnapshotCamera::new(url, timeout))),
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| anyhow!("invalid file url '{}'", source))?;
                Ok(Box::new(FileCamera::new(path)))
            }
            other => Err(anyhow!(
                "unsupported camera scheme '{}'; expected http(s), file or a local path",
                other
            )),
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Box::new(FileCamera::new(source))),
        Err(err) => Err(anyhow!("invalid camera source '{}': {}", source, err)),
    }
}

pub struct HttpSnapshotCamera {
    url: Url,
    agent: ureq::Agent,
}

impl HttpSnapshotCamera {
    pub fn new(url: Url, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { url, agent }
    }
}

impl Camera for HttpSnapshotCamera {
    fn capture(&mut self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(self.url.as_str())
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64 + 1)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        validate_jpeg(&bytes)?;
        Ok(bytes)
    }
}

fn validate_jpeg(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    if bytes.len() > MAX_JPEG_BYTES {
        return Err(anyhow!("jpeg snapshot exceeds {} bytes", MAX_JPEG_BYTES));
    }
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return Err(anyhow!("snapshot is not a jpeg (missing SOI marker)"));
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct FileCamera {
    path: PathBuf,
}

impl FileCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Camera for FileCamera {
    fn capture(&mut self) -> Result<Vec<u8>> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read capture file {}", self.path.display()))?;
        if bytes.is_empty() {
            return Err(anyhow!("capture file {} is empty", self.path.display()));
        }
        Ok(bytes)
    }
}
