//! Single-slot command mailbox and result cache.
//!
//! The capture device cannot accept inbound connections, so the dispatcher
//! leaves at most one instruction here and the device collects it on its
//! next poll. The mailbox is:
//! - overwrite-on-issue (last write wins, no queue)
//! - consume-on-poll (a command is handed to exactly one poller)
//!
//! The result cache is the mirror image: the recognizer overwrites it after
//! every `/recognize` call and the dispatcher reads it without clearing.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::outcome::CaptureOutcome;

/// What the device should do with the next capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Attendance,
    Register,
}

impl Mode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "attendance" => Ok(Mode::Attendance),
            "register" => Ok(Mode::Register),
            other => Err(anyhow!("unsupported capture mode '{}'", other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Attendance => "attendance",
            Mode::Register => "register",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending instruction for the capture device.
///
/// `subject_name` is present iff `mode == Register`; the constructor enforces it.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    mode: Mode,
    subject_name: Option<String>,
    issued_at: SystemTime,
}

impl Command {
    pub fn new(mode: Mode, subject_name: Option<&str>) -> Result<Self> {
        Self::issued_at(mode, subject_name, SystemTime::now())
    }

    pub fn issued_at(mode: Mode, subject_name: Option<&str>, issued_at: SystemTime) -> Result<Self> {
        let subject_name = match mode {
            Mode::Attendance => None,
            Mode::Register => {
                let name = subject_name.map(str::trim).unwrap_or("");
                if name.is_empty() {
                    return Err(anyhow!("Student name is required for registration"));
                }
                Some(name.to_string())
            }
        };
        Ok(Self {
            mode,
            subject_name,
            issued_at,
        })
    }

    pub fn attendance() -> Self {
        Self {
            mode: Mode::Attendance,
            subject_name: None,
            issued_at: SystemTime::now(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn subject_name(&self) -> Option<&str> {
        self.subject_name.as_deref()
    }

    pub fn issued(&self) -> SystemTime {
        self.issued_at
    }

    fn expired(&self, ttl: Option<Duration>, now: SystemTime) -> bool {
        match ttl {
            // A clock that went backwards leaves the command alive.
            Some(ttl) => now
                .duration_since(self.issued_at)
                .map(|age| age >= ttl)
                .unwrap_or(false),
            None => false,
        }
    }
}

/// Wire form of `GET /command/poll`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollResponse {
    Capture {
        mode: Mode,
        student_name: Option<String>,
    },
    NoCommand,
}

impl From<Option<Command>> for PollResponse {
    fn from(command: Option<Command>) -> Self {
        match command {
            Some(command) => PollResponse::Capture {
                mode: command.mode,
                student_name: command.subject_name,
            },
            None => PollResponse::NoCommand,
        }
    }
}

/// Single-slot, lock-guarded command store.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<Command>>,
    ttl: Option<Duration>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mailbox whose commands are dropped by the first poll after `ttl`.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl: (!ttl.is_zero()).then_some(ttl),
        }
    }

    /// Stores `command`, replacing whatever was pending.
    pub fn issue(&self, command: Command) -> Result<()> {
        let mut slot = self.lock()?;
        if let Some(previous) = slot.as_ref() {
            log::info!(
                "mailbox: replacing unconsumed {} command with {}",
                previous.mode,
                command.mode
            );
        }
        *slot = Some(command);
        Ok(())
    }

    /// Takes the pending command, leaving the slot empty.
    pub fn poll_and_clear(&self) -> Result<Option<Command>> {
        self.poll_and_clear_at(SystemTime::now())
    }

    pub fn poll_and_clear_at(&self, now: SystemTime) -> Result<Option<Command>> {
        let mut slot = self.lock()?;
        let Some(command) = slot.take() else {
            return Ok(None);
        };
        if command.expired(self.ttl, now) {
            log::warn!(
                "mailbox: discarding expired {} command (not polled within {:?})",
                command.mode,
                self.ttl.unwrap_or_default()
            );
            return Ok(None);
        }
        Ok(Some(command))
    }

    /// True when a live command is waiting for the device.
    pub fn is_pending(&self) -> Result<bool> {
        let slot = self.lock()?;
        Ok(slot
            .as_ref()
            .is_some_and(|command| !command.expired(self.ttl, SystemTime::now())))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Command>>> {
        self.slot
            .lock()
            .map_err(|_| anyhow!("mailbox lock poisoned"))
    }
}

/// Single-slot store of the most recent capture outcome.
#[derive(Debug, Default)]
pub struct ResultCache {
    slot: Mutex<Option<CaptureOutcome>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, outcome: CaptureOutcome) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| anyhow!("result cache lock poisoned"))?;
        *slot = Some(outcome);
        Ok(())
    }

    pub fn latest(&self) -> Result<Option<CaptureOutcome>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| anyhow!("result cache lock poisoned"))?;
        Ok(slot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn last_issue_wins() -> Result<()> {
        let mailbox = Mailbox::new();
        mailbox.issue(Command::attendance())?;
        mailbox.issue(Command::new(Mode::Register, Some("X"))?)?;

        let polled = mailbox.poll_and_clear()?.expect("command pending");
        assert_eq!(polled.mode(), Mode::Register);
        assert_eq!(polled.subject_name(), Some("X"));
        Ok(())
    }

    #[test]
    fn poll_clears_the_slot() -> Result<()> {
        let mailbox = Mailbox::new();
        mailbox.issue(Command::attendance())?;
        assert!(mailbox.is_pending()?);

        assert!(mailbox.poll_and_clear()?.is_some());
        assert!(mailbox.poll_and_clear()?.is_none());
        assert!(!mailbox.is_pending()?);
        Ok(())
    }

    #[test]
    fn register_requires_a_name() {
        assert!(Command::new(Mode::Register, None).is_err());
        assert!(Command::new(Mode::Register, Some("   ")).is_err());
    }

    #[test]
    fn attendance_drops_the_name() -> Result<()> {
        let command = Command::new(Mode::Attendance, Some("ignored"))?;
        assert_eq!(command.subject_name(), None);
        Ok(())
    }

    #[test]
    fn expired_command_is_discarded_by_poll() -> Result<()> {
        let mailbox = Mailbox::with_ttl(Duration::from_secs(30));
        let issued = SystemTime::now() - Duration::from_secs(31);
        mailbox.issue(Command::issued_at(Mode::Attendance, None, issued)?)?;

        assert!(!mailbox.is_pending()?);
        assert!(mailbox.poll_and_clear()?.is_none());
        Ok(())
    }

    #[test]
    fn zero_ttl_disables_expiry() -> Result<()> {
        let mailbox = Mailbox::with_ttl(Duration::ZERO);
        let issued = SystemTime::now() - Duration::from_secs(3600);
        mailbox.issue(Command::issued_at(Mode::Attendance, None, issued)?)?;
        assert!(mailbox.poll_and_clear()?.is_some());
        Ok(())
    }

    #[test]
    fn concurrent_pollers_receive_a_command_once() -> Result<()> {
        let mailbox = Arc::new(Mailbox::new());
        mailbox.issue(Command::attendance())?;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mailbox = mailbox.clone();
                std::thread::spawn(move || mailbox.poll_and_clear().map(|c| c.is_some()))
            })
            .collect();

        let mut delivered = 0;
        for handle in handles {
            if handle.join().expect("poller thread")? {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
        Ok(())
    }

    #[test]
    fn poll_response_wire_form() -> Result<()> {
        let capture = PollResponse::from(Some(Command::new(Mode::Register, Some("Ana"))?));
        assert_eq!(
            serde_json::to_value(&capture)?,
            serde_json::json!({"status": "capture", "mode": "register", "student_name": "Ana"})
        );

        let attendance = PollResponse::from(Some(Command::attendance()));
        assert_eq!(
            serde_json::to_value(&attendance)?,
            serde_json::json!({"status": "capture", "mode": "attendance", "student_name": null})
        );

        let empty = PollResponse::from(None);
        assert_eq!(
            serde_json::to_value(&empty)?,
            serde_json::json!({"status": "no_command"})
        );
        Ok(())
    }

    #[test]
    fn result_cache_keeps_latest() -> Result<()> {
        let cache = ResultCache::new();
        assert!(cache.latest()?.is_none());
        cache.publish(CaptureOutcome::unknown())?;
        cache.publish(CaptureOutcome::error("camera offline"))?;
        assert_eq!(cache.latest()?, Some(CaptureOutcome::error("camera offline")));
        Ok(())
    }
}
