use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::api::{ApiConfig, DEFAULT_MAX_UPLOAD_BYTES};

const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_ENCODER: &str = "thumbnail";
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 5 * 60;
const DEFAULT_COMMAND_TTL_SECS: u64 = 30;
const DEFAULT_KNOWN_FACES_DIR: &str = "known_faces";
const DEFAULT_DB_PATH: &str = "attendance.db";
const MAX_TOLERANCE: f64 = 2.0;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_UPLOAD_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_CAMERA_URL: &str = "http://127.0.0.1/capture";

#[derive(Debug, Deserialize, Default)]
struct RelaydConfigFile {
    api: Option<ApiConfigFile>,
    matching: Option<MatchingConfigFile>,
    dedup: Option<DedupConfigFile>,
    mailbox: Option<MailboxConfigFile>,
    storage: Option<StorageConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct MatchingConfigFile {
    tolerance: Option<f64>,
    encoder: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DedupConfigFile {
    window_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MailboxConfigFile {
    command_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    known_faces_dir: Option<PathBuf>,
    db_path: Option<String>,
}

/// Settings for the `relayd` server.
#[derive(Debug, Clone)]
pub struct RelaydConfig {
    pub api: ApiConfig,
    pub tolerance: f64,
    pub encoder: String,
    pub dedup_window: Duration,
    /// Zero disables command expiry.
    pub command_ttl: Duration,
    pub known_faces_dir: PathBuf,
    pub db_path: String,
}

impl RelaydConfig {
    pub fn load() -> Result<Self> {
        let file_cfg = read_optional_config::<RelaydConfigFile>("RELAY_CONFIG")?;
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelaydConfigFile) -> Self {
        let api = ApiConfig {
            addr: file
                .api
                .as_ref()
                .and_then(|api| api.addr.clone())
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_bytes: file
                .api
                .as_ref()
                .and_then(|api| api.max_upload_bytes)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        };
        let tolerance = file
            .matching
            .as_ref()
            .and_then(|matching| matching.tolerance)
            .unwrap_or(crate::matcher::DEFAULT_TOLERANCE);
        let encoder = file
            .matching
            .and_then(|matching| matching.encoder)
            .unwrap_or_else(|| DEFAULT_ENCODER.to_string());
        let dedup_window = Duration::from_secs(
            file.dedup
                .and_then(|dedup| dedup.window_secs)
                .unwrap_or(DEFAULT_DEDUP_WINDOW_SECS),
        );
        let command_ttl = Duration::from_secs(
            file.mailbox
                .and_then(|mailbox| mailbox.command_ttl_secs)
                .unwrap_or(DEFAULT_COMMAND_TTL_SECS),
        );
        let known_faces_dir = file
            .storage
            .as_ref()
            .and_then(|storage| storage.known_faces_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_KNOWN_FACES_DIR));
        let db_path = file
            .storage
            .and_then(|storage| storage.db_path)
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        Self {
            api,
            tolerance,
            encoder,
            dedup_window,
            command_ttl,
            known_faces_dir,
            db_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("RELAY_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(tolerance) = parse_env::<f64>("RELAY_TOLERANCE", "a number")? {
            self.tolerance = tolerance;
        }
        if let Some(encoder) = env_value("RELAY_ENCODER") {
            self.encoder = encoder;
        }
        if let Some(secs) = parse_env::<u64>("RELAY_DEDUP_WINDOW_SECS", "an integer number of seconds")? {
            self.dedup_window = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("RELAY_COMMAND_TTL_SECS", "an integer number of seconds")? {
            self.command_ttl = Duration::from_secs(secs);
        }
        if let Some(dir) = env_value("RELAY_KNOWN_FACES_DIR") {
            self.known_faces_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_value("RELAY_DB_PATH") {
            self.db_path = path;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(self.tolerance > 0.0 && self.tolerance <= MAX_TOLERANCE) {
            return Err(anyhow!(
                "matching tolerance must be in (0, {}], got {}",
                MAX_TOLERANCE,
                self.tolerance
            ));
        }
        self.encoder = self.encoder.trim().to_lowercase();
        if !matches!(self.encoder.as_str(), "thumbnail" | "stub") {
            return Err(anyhow!(
                "unknown encoder '{}'; expected thumbnail or stub",
                self.encoder
            ));
        }
        if self.dedup_window.is_zero() {
            return Err(anyhow!("dedup window must be greater than zero"));
        }
        if self.api.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct AgentConfigFile {
    server_url: Option<String>,
    poll_interval_ms: Option<u64>,
    poll_timeout_ms: Option<u64>,
    upload_timeout_ms: Option<u64>,
    camera: Option<CameraConfigFile>,
    signal: Option<SignalConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SignalConfigFile {
    led_path: Option<PathBuf>,
    flash_path: Option<PathBuf>,
}

/// Settings for the `capture_agent` device loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub server_url: String,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub upload_timeout: Duration,
    pub camera_url: String,
    /// No LED path means the signal is only logged.
    pub led_path: Option<PathBuf>,
    pub flash_path: Option<PathBuf>,
}

impl AgentConfig {
    pub fn load() -> Result<Self> {
        let file_cfg = read_optional_config::<AgentConfigFile>("CAPTURE_AGENT_CONFIG")?;
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AgentConfigFile) -> Self {
        let signal = file.signal.unwrap_or_default();
        Self {
            server_url: file
                .server_url
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            poll_timeout: Duration::from_millis(
                file.poll_timeout_ms.unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
            ),
            upload_timeout: Duration::from_millis(
                file.upload_timeout_ms.unwrap_or(DEFAULT_UPLOAD_TIMEOUT_MS),
            ),
            camera_url: file
                .camera
                .and_then(|camera| camera.url)
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            led_path: signal.led_path,
            flash_path: signal.flash_path,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("CAPTURE_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(ms) = parse_env::<u64>("CAPTURE_POLL_INTERVAL_MS", "an integer number of milliseconds")? {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(url) = env_value("CAPTURE_CAMERA_URL") {
            self.camera_url = url;
        }
        if let Some(path) = env_value("CAPTURE_LED_PATH") {
            self.led_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_value("CAPTURE_FLASH_PATH") {
            self.flash_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.poll_timeout.is_zero() || self.upload_timeout.is_zero() {
            return Err(anyhow!("network timeouts must be greater than zero"));
        }
        let url = url::Url::parse(&self.server_url)
            .map_err(|e| anyhow!("invalid server url '{}': {}", self.server_url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!("server url must use http or https"));
        }
        if self.camera_url.trim().is_empty() {
            return Err(anyhow!("camera url must not be empty"));
        }
        if self.flash_path.is_some() && self.led_path.is_none() {
            log::warn!("flash_path set without led_path; status is log-only, flash is ignored");
        }
        Ok(())
    }
}

fn read_optional_config<T: DeserializeOwned>(env_var: &str) -> Result<Option<T>> {
    match std::env::var(env_var).ok().as_deref() {
        Some(path) if !path.trim().is_empty() => Ok(Some(read_config_file(Path::new(path))?)),
        _ => Ok(None),
    }
}

fn read_config_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: FromStr>(name: &str, expected: &str) -> Result<Option<T>> {
    match env_value(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", name, expected)),
        None => Ok(None),
    }
}
