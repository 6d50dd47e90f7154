//! relayd - attendance relay server
//!
//! This daemon:
//! 1. Loads known faces and seeds the dedup guard from the attendance log
//! 2. Serves the command mailbox and recognition API
//! 3. Runs until Ctrl-C

use anyhow::{Context, Result};
use std::sync::{mpsc, Arc};

use attendance_relay::{
    api::ApiServer, config::RelaydConfig, encoder_for, DedupGuard, GalleryStore, Mailbox,
    MatchEngine, RelayState, Recognizer, SqliteAttendanceLog,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RelaydConfig::load()?;
    let encoder = encoder_for(&config.encoder)?;
    let store = GalleryStore::open(&config.known_faces_dir)?;
    let attendance = SqliteAttendanceLog::open(&config.db_path)
        .with_context(|| format!("open attendance log {}", config.db_path))?;

    let recognizer = Recognizer::new(
        encoder,
        MatchEngine::new(config.tolerance)?,
        DedupGuard::new(config.dedup_window),
        Box::new(attendance),
    )
    .with_store(store);

    let names = recognizer.reload()?;
    if names.is_empty() {
        log::warn!(
            "no known faces in {}; every attendance capture will be unknown",
            config.known_faces_dir.display()
        );
    }
    let seeded = recognizer.seed_dedup()?;
    log::info!(
        "encoder={} tolerance={} dedup_window={}s seeded {} recent attendance event(s)",
        config.encoder,
        config.tolerance,
        config.dedup_window.as_secs(),
        seeded
    );

    let state = RelayState {
        mailbox: Arc::new(Mailbox::with_ttl(config.command_ttl)),
        recognizer: Arc::new(recognizer),
    };
    let api_handle = ApiServer::new(config.api.clone(), state).spawn()?;
    log::info!("relay api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("relayd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
