use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use attendance_relay::config::{AgentConfig, RelaydConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RELAY_CONFIG",
        "RELAY_API_ADDR",
        "RELAY_TOLERANCE",
        "RELAY_ENCODER",
        "RELAY_DEDUP_WINDOW_SECS",
        "RELAY_COMMAND_TTL_SECS",
        "RELAY_KNOWN_FACES_DIR",
        "RELAY_DB_PATH",
        "CAPTURE_AGENT_CONFIG",
        "CAPTURE_SERVER_URL",
        "CAPTURE_POLL_INTERVAL_MS",
        "CAPTURE_CAMERA_URL",
        "CAPTURE_LED_PATH",
        "CAPTURE_FLASH_PATH",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn relayd_defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = RelaydConfig::load().expect("load defaults");
    assert_eq!(cfg.api.addr, "0.0.0.0:5000");
    assert_eq!(cfg.api.max_upload_bytes, 16 * 1024 * 1024);
    assert_eq!(cfg.tolerance, 0.6);
    assert_eq!(cfg.encoder, "thumbnail");
    assert_eq!(cfg.dedup_window, Duration::from_secs(300));
    assert_eq!(cfg.command_ttl, Duration::from_secs(30));
    assert_eq!(cfg.known_faces_dir, std::path::PathBuf::from("known_faces"));
    assert_eq!(cfg.db_path, "attendance.db");
}

#[test]
fn relayd_loads_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "api": { "addr": "127.0.0.1:6000", "max_upload_bytes": 1048576 },
            "matching": { "tolerance": 0.5, "encoder": "stub" },
            "dedup": { "window_secs": 120 },
            "mailbox": { "command_ttl_secs": 0 },
            "storage": { "known_faces_dir": "/srv/faces", "db_path": "/srv/attendance.db" }
        }"#,
    );
    std::env::set_var("RELAY_CONFIG", file.path());
    std::env::set_var("RELAY_TOLERANCE", "0.45");
    std::env::set_var("RELAY_DB_PATH", "/var/lib/relay/attendance.db");

    let cfg = RelaydConfig::load().expect("load config");
    assert_eq!(cfg.api.addr, "127.0.0.1:6000");
    assert_eq!(cfg.api.max_upload_bytes, 1_048_576);
    assert_eq!(cfg.tolerance, 0.45);
    assert_eq!(cfg.encoder, "stub");
    assert_eq!(cfg.dedup_window, Duration::from_secs(120));
    assert_eq!(cfg.command_ttl, Duration::ZERO);
    assert_eq!(cfg.known_faces_dir, std::path::PathBuf::from("/srv/faces"));
    assert_eq!(cfg.db_path, "/var/lib/relay/attendance.db");

    clear_env();
}

#[test]
fn relayd_rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RELAY_TOLERANCE", "0");
    assert!(RelaydConfig::load().is_err());
    std::env::set_var("RELAY_TOLERANCE", "not-a-number");
    assert!(RelaydConfig::load().is_err());
    clear_env();

    std::env::set_var("RELAY_ENCODER", "dlib");
    assert!(RelaydConfig::load().is_err());
    clear_env();

    std::env::set_var("RELAY_DEDUP_WINDOW_SECS", "0");
    assert!(RelaydConfig::load().is_err());
    clear_env();

    let file = write_config("{ not json");
    std::env::set_var("RELAY_CONFIG", file.path());
    assert!(RelaydConfig::load().is_err());
    clear_env();
}

#[test]
fn agent_defaults_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AgentConfig::load().expect("load defaults");
    assert_eq!(cfg.server_url, "http://127.0.0.1:5000");
    assert_eq!(cfg.poll_interval, Duration::from_millis(2000));
    assert_eq!(cfg.poll_timeout, Duration::from_millis(5000));
    assert_eq!(cfg.upload_timeout, Duration::from_millis(15000));
    assert_eq!(cfg.camera_url, "http://127.0.0.1/capture");
    assert!(cfg.led_path.is_none());
    assert!(cfg.flash_path.is_none());
}

#[test]
fn agent_loads_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "server_url": "http://192.168.1.20:5000",
            "poll_interval_ms": 1000,
            "upload_timeout_ms": 8000,
            "camera": { "url": "http://192.168.4.1/capture" },
            "signal": { "led_path": "/sys/class/leds/status/brightness" }
        }"#,
    );
    std::env::set_var("CAPTURE_AGENT_CONFIG", file.path());
    std::env::set_var("CAPTURE_POLL_INTERVAL_MS", "500");
    std::env::set_var("CAPTURE_FLASH_PATH", "/sys/class/leds/flash/brightness");

    let cfg = AgentConfig::load().expect("load config");
    assert_eq!(cfg.server_url, "http://192.168.1.20:5000");
    assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    assert_eq!(cfg.poll_timeout, Duration::from_millis(5000));
    assert_eq!(cfg.upload_timeout, Duration::from_millis(8000));
    assert_eq!(cfg.camera_url, "http://192.168.4.1/capture");
    assert_eq!(
        cfg.led_path.as_deref(),
        Some(std::path::Path::new("/sys/class/leds/status/brightness"))
    );
    assert_eq!(
        cfg.flash_path.as_deref(),
        Some(std::path::Path::new("/sys/class/leds/flash/brightness"))
    );

    clear_env();
}

#[test]
fn agent_rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAPTURE_POLL_INTERVAL_MS", "0");
    assert!(AgentConfig::load().is_err());
    clear_env();

    std::env::set_var("CAPTURE_SERVER_URL", "mqtt://broker");
    assert!(AgentConfig::load().is_err());
    clear_env();
}
