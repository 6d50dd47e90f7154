//! HTTP API for the dispatcher and the capture device.
//!
//! Plain HTTP/1.1 over `std::net`, one short-lived thread per connection,
//! `Connection: close` on every response. Routes are also served under an
//! `/api` prefix for older device firmware.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::mailbox::{Command, Mailbox, Mode, PollResponse};
use crate::outcome::CaptureOutcome;
use crate::recognizer::{Probe, Recognizer};

const MAX_HEADER_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DISCARD_BYTES: u64 = 64 * 1024 * 1024;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Shared server state handed to every connection thread.
#[derive(Clone)]
pub struct RelayState {
    pub mailbox: Arc<Mailbox>,
    pub recognizer: Arc<Recognizer>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: RelayState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: RelayState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("parse api addr '{}'", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let state = self.state;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, state, shutdown_thread) {
                log::error!("relay api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    state: RelayState,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let cfg = Arc::new(cfg);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let state = state.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &state) {
                        log::warn!("relay api request from {} failed: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Capture,
    Poll,
    Result,
    Recognize,
    Reload,
    Health,
}

impl Route {
    fn from_path(path: &str) -> Option<Self> {
        let path = path.strip_prefix("/api").filter(|p| p.starts_with('/')).unwrap_or(path);
        match path {
            "/command/capture" => Some(Route::Capture),
            "/command/poll" => Some(Route::Poll),
            "/command/result" => Some(Route::Result),
            "/recognize" => Some(Route::Recognize),
            "/reload" => Some(Route::Reload),
            "/health" => Some(Route::Health),
            _ => None,
        }
    }

    fn method(self) -> &'static str {
        match self {
            Route::Capture | Route::Recognize | Route::Reload => "POST",
            Route::Poll | Route::Result | Route::Health => "GET",
        }
    }
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, state: &RelayState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut request = read_head(&mut stream)?;

    let Some(route) = Route::from_path(&request.path) else {
        return write_json(&mut stream, 404, &json!({"error": "not_found"}));
    };
    if request.method != route.method() {
        return write_json(&mut stream, 405, &json!({"error": "method_not_allowed"}));
    }
    let declared = request.content_length()?;
    if declared > cfg.max_upload_bytes {
        log::warn!(
            "relay api: refusing {} byte body on {} (limit {})",
            declared,
            request.path,
            cfg.max_upload_bytes
        );
        let outcome = match route {
            Route::Recognize => state.recognizer.reject("Request body too large"),
            _ => CaptureOutcome::error("Request body too large"),
        };
        discard_body(&mut stream, &request, declared);
        return write_json(&mut stream, 413, &outcome);
    }
    read_body(&mut stream, &mut request)?;
    log::debug!("relay api: {} {}", request.method, request.path);

    match route {
        Route::Capture => handle_capture(&mut stream, &request, state),
        Route::Poll => {
            let command = state.mailbox.poll_and_clear()?;
            if let Some(command) = &command {
                log::info!(
                    "relay api: device collected {} command{}",
                    command.mode(),
                    command
                        .subject_name()
                        .map(|n| format!(" for '{}'", n))
                        .unwrap_or_default()
                );
            }
            write_json(&mut stream, 200, &PollResponse::from(command))
        }
        Route::Result => match state.recognizer.results().latest()? {
            Some(outcome) => write_json(&mut stream, 200, &outcome),
            None => write_json(
                &mut stream,
                200,
                &json!({"status": "waiting", "pending": state.mailbox.is_pending()?}),
            ),
        },
        Route::Recognize => handle_recognize(&mut stream, request, state),
        Route::Reload => match state.recognizer.reload() {
            Ok(names) => write_json(
                &mut stream,
                200,
                &json!({
                    "status": "success",
                    "message": format!("Loaded {} known face(s)", names.len()),
                    "students": names,
                }),
            ),
            Err(err) => write_json(
                &mut stream,
                500,
                &json!({"status": "error", "message": err.to_string()}),
            ),
        },
        Route::Health => write_json(
            &mut stream,
            200,
            &json!({
                "status": "healthy",
                "known_faces_count": state.recognizer.gallery().len()?,
                "pending": state.mailbox.is_pending()?,
            }),
        ),
    }
}

#[derive(Debug, Default, Deserialize)]
struct CaptureRequest {
    mode: Option<String>,
    name: Option<String>,
}

fn handle_capture(stream: &mut TcpStream, request: &HttpRequest, state: &RelayState) -> Result<()> {
    let body: CaptureRequest = if request.body.iter().all(u8::is_ascii_whitespace) {
        CaptureRequest::default()
    } else {
        match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(err) => {
                return write_json(
                    stream,
                    400,
                    &json!({"status": "error", "message": format!("invalid JSON body: {}", err)}),
                )
            }
        }
    };

    let command = Mode::parse(body.mode.as_deref().unwrap_or("attendance"))
        .and_then(|mode| Command::new(mode, body.name.as_deref()));
    let command = match command {
        Ok(command) => command,
        Err(err) => {
            return write_json(
                stream,
                400,
                &json!({"status": "error", "message": err.to_string()}),
            )
        }
    };

    let mode = command.mode();
    log::info!(
        "relay api: capture requested: mode={}, name={}",
        mode,
        command.subject_name().unwrap_or("-")
    );
    state.mailbox.issue(command)?;
    write_json(stream, 200, &json!({"status": "success", "mode": mode}))
}

fn handle_recognize(stream: &mut TcpStream, request: HttpRequest, state: &RelayState) -> Result<()> {
    let mode = request
        .headers
        .get("x-capture-mode")
        .map(|value| value.as_str())
        .unwrap_or("attendance");
    let outcome = match Mode::parse(mode) {
        Ok(mode) => state.recognizer.recognize(Probe {
            image: request.body,
            mode,
            subject_name: request
                .headers
                .get("x-student-name")
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
        }),
        Err(err) => state.recognizer.reject(err.to_string()),
    };
    let status = match outcome {
        CaptureOutcome::Error { .. } => 400,
        _ => 200,
    };
    write_json(stream, status, &outcome)
}

fn read_head(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
        body: data[header_end + 4..].to_vec(),
    })
}

fn read_body(stream: &mut TcpStream, request: &mut HttpRequest) -> Result<()> {
    let expected = request.content_length()?;
    let mut buf = [0u8; 16 * 1024];
    while request.body.len() < expected {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!(
                "connection closed after {} of {} body bytes",
                request.body.len(),
                expected
            ));
        }
        request.body.extend_from_slice(&buf[..n]);
    }
    request.body.truncate(expected);
    Ok(())
}

/// Reads and drops the unread part of a refused body so the client sees the
/// response instead of a reset.
fn discard_body(stream: &mut TcpStream, request: &HttpRequest, declared: usize) {
    let remaining = (declared as u64)
        .saturating_sub(request.body.len() as u64)
        .min(MAX_DISCARD_BYTES);
    let reader: &TcpStream = stream;
    if let Err(err) = std::io::copy(&mut reader.take(remaining), &mut std::io::sink()) {
        log::debug!("relay api: discarding refused body failed: {}", err);
    }
}

fn write_json<T: serde::Serialize>(stream: &mut TcpStream, status: u16, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn content_length(&self) -> Result<usize> {
        match self.headers.get("content-length") {
            Some(value) => value
                .parse()
                .map_err(|_| anyhow!("invalid content-length '{}'", value)),
            None => Ok(0),
        }
    }
}
