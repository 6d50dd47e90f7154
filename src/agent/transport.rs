//! Agent side of the relay wire contract.

use super::CapturedImage;
use crate::mailbox::{Mode, PollResponse};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Failure of one step of a capture cycle. None of these end the agent loop.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed server response: {0}")]
    Malformed(String),

    #[error("capture failed: {0}")]
    Capture(String),
}

pub trait ServerTransport {
    fn health(&mut self) -> Result<(), CycleError>;

    /// Read-and-clear of the server mailbox.
    fn poll(&mut self) -> Result<PollResponse, CycleError>;

    /// Uploads one captured image and returns the raw response body.
    ///
    /// Non-2xx statuses that still carry a body are returned as `Ok`; the
    /// body is an outcome the caller has to interpret.
    fn upload(&mut self, capture: &CapturedImage) -> Result<String, CycleError>;
}

pub struct HttpTransport {
    base: Url,
    agent: ureq::Agent,
    poll_timeout: Duration,
    upload_timeout: Duration,
}

impl HttpTransport {
    pub fn new(server_url: &str, poll_timeout: Duration, upload_timeout: Duration) -> anyhow::Result<Self> {
        let mut base = Url::parse(server_url)
            .map_err(|err| anyhow::anyhow!("invalid server url '{}': {}", server_url, err))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow::anyhow!(
                "server url must be http(s), got '{}'",
                base.scheme()
            ));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            agent: ureq::AgentBuilder::new().build(),
            poll_timeout,
            upload_timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, CycleError> {
        self.base
            .join(path)
            .map_err(|err| CycleError::Transport(format!("bad endpoint {}: {}", path, err)))
    }
}

impl ServerTransport for HttpTransport {
    fn health(&mut self) -> Result<(), CycleError> {
        let url = self.endpoint("health")?;
        self.agent
            .get(url.as_str())
            .timeout(self.poll_timeout)
            .call()
            .map_err(transport_error)?;
        Ok(())
    }

    fn poll(&mut self) -> Result<PollResponse, CycleError> {
        let url = self.endpoint("command/poll")?;
        let response = self
            .agent
            .get(url.as_str())
            .timeout(self.poll_timeout)
            .call()
            .map_err(transport_error)?;
        let body = response
            .into_string()
            .map_err(|err| CycleError::Transport(format!("read poll response: {}", err)))?;
        serde_json::from_str(&body).map_err(|err| CycleError::Malformed(err.to_string()))
    }

    fn upload(&mut self, capture: &CapturedImage) -> Result<String, CycleError> {
        let url = self.endpoint("recognize")?;
        let mut request = self
            .agent
            .post(url.as_str())
            .timeout(self.upload_timeout)
            .set("Content-Type", "image/jpeg")
            .set("X-Capture-Mode", capture.mode.as_str());
        if let (Mode::Register, Some(name)) = (capture.mode, capture.subject_name.as_deref()) {
            request = request.set("X-Student-Name", name);
        }
        let response = match request.send_bytes(&capture.image) {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => return Err(transport_error(err)),
        };
        response
            .into_string()
            .map_err(|err| CycleError::Transport(format!("read upload response: {}", err)))
    }
}

fn transport_error(err: ureq::Error) -> CycleError {
    match err {
        ureq::Error::Status(code, _) => CycleError::Transport(format!("http status {}", code)),
        ureq::Error::Transport(transport) => CycleError::Transport(transport.to_string()),
    }
}
