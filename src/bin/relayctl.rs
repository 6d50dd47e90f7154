//! relayctl - dispatcher command line for the attendance relay.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Issue capture commands and read results from relayd")]
struct Args {
    /// Base URL of the relay server.
    #[arg(long, env = "RELAY_URL", default_value = "http://127.0.0.1:5000")]
    server: String,

    /// Request timeout in seconds.
    #[arg(long, default_value = "10")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Ask the device to capture a frame.
    Capture {
        /// Register the captured face under this name instead of taking attendance.
        #[arg(long)]
        register: Option<String>,
    },
    /// Show the most recent capture outcome.
    Result,
    /// Reload the known-faces directory on the server.
    Reload,
    /// Server health and mailbox state.
    Health,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let base = url::Url::parse(&args.server)
        .map_err(|e| anyhow!("invalid server url '{}': {}", args.server, e))?;
    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(args.timeout_secs))
        .build();

    let (method, path, body) = match &args.command {
        Cmd::Capture { register: None } => ("POST", "command/capture", Some(json!({"mode": "attendance"}))),
        Cmd::Capture {
            register: Some(name),
        } => (
            "POST",
            "command/capture",
            Some(json!({"mode": "register", "name": name})),
        ),
        Cmd::Result => ("GET", "command/result", None),
        Cmd::Reload => ("POST", "reload", Some(json!({}))),
        Cmd::Health => ("GET", "health", None),
    };
    let url = base.join(path).with_context(|| format!("build url for {}", path))?;
    log::debug!("{} {}", method, url);

    let request = agent.request(method, url.as_str());
    let response = match body {
        Some(body) => request
            .set("Content-Type", "application/json")
            .send_string(&body.to_string()),
        None => request.call(),
    };
    let (status, response) = match response {
        Ok(response) => (response.status(), response),
        Err(ureq::Error::Status(code, response)) => (code, response),
        Err(err) => return Err(anyhow!("request to {} failed: {}", url, err)),
    };
    let raw = response
        .into_string()
        .with_context(|| format!("read response from {}", url))?;
    let value: Value =
        serde_json::from_str(&raw).with_context(|| format!("decode response from {}", url))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    if status >= 400 {
        return Err(anyhow!("server answered {}", status));
    }
    Ok(())
}
