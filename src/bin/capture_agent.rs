//! capture_agent - device-side capture loop
//!
//! Polls the relay for capture commands, grabs a frame, uploads it and
//! blinks the outcome on the status LED.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use attendance_relay::agent::camera::camera_for;
use attendance_relay::agent::signal::{LogSignal, SignalOutput, SysfsSignal};
use attendance_relay::agent::transport::HttpTransport;
use attendance_relay::agent::CaptureAgent;
use attendance_relay::config::AgentConfig;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AgentConfig::load()?;
    let transport = HttpTransport::new(
        &config.server_url,
        config.poll_timeout,
        config.upload_timeout,
    )?;
    let camera = camera_for(&config.camera_url, config.upload_timeout)?;
    let signal: Box<dyn SignalOutput> = match &config.led_path {
        Some(led) => Box::new(SysfsSignal::new(led.clone(), config.flash_path.clone())),
        None => Box::new(LogSignal),
    };

    log::info!(
        "capture_agent: server={} camera={} poll_interval={}ms",
        config.server_url,
        config.camera_url,
        config.poll_interval.as_millis()
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let mut agent = CaptureAgent::new(transport, camera, signal, config.poll_interval);
    agent.startup();
    agent.run(&shutdown);
    Ok(())
}
