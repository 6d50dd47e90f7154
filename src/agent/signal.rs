//! Outcome-to-blink encoding and the LED outputs that play it.
//!
//! `pattern_for` is a pure, total mapping; every signal has exactly one
//! pattern. Playing a pattern blocks the agent loop, so no poll happens
//! while a pattern is showing.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::outcome::OutcomeKind;

/// `pulses` blinks, each `pulse` on followed by `pulse` off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pattern {
    pub pulses: u32,
    pub pulse: Duration,
}

impl Pattern {
    pub const fn new(pulses: u32, pulse_ms: u64) -> Self {
        Self {
            pulses,
            pulse: Duration::from_millis(pulse_ms),
        }
    }

    /// Wall time the pattern occupies, off-gaps included.
    pub fn duration(&self) -> Duration {
        self.pulse * self.pulses * 2
    }
}

/// Everything the device can report on its status LED.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    Outcome(OutcomeKind),
    LinkEstablished,
    LinkFailed,
    UploadFailed,
}

pub const fn pattern_for(signal: Signal) -> Pattern {
    match signal {
        Signal::Outcome(OutcomeKind::Success) => Pattern::new(1, 500),
        Signal::Outcome(OutcomeKind::Registered) => Pattern::new(2, 400),
        Signal::Outcome(OutcomeKind::Duplicate) => Pattern::new(2, 150),
        Signal::Outcome(OutcomeKind::Unknown) => Pattern::new(3, 100),
        Signal::Outcome(OutcomeKind::Error) => Pattern::new(5, 50),
        Signal::LinkEstablished => Pattern::new(3, 100),
        Signal::LinkFailed => Pattern::new(10, 50),
        Signal::UploadFailed => Pattern::new(3, 250),
    }
}

/// Status LED plus capture illumination.
pub trait SignalOutput: Send {
    fn set_status(&mut self, on: bool) -> Result<()>;

    fn set_flash(&mut self, on: bool) -> Result<()>;

    /// Blocks for `pattern.duration()`.
    fn play(&mut self, pattern: Pattern) -> Result<()> {
        for _ in 0..pattern.pulses {
            self.set_status(true)?;
            std::thread::sleep(pattern.pulse);
            self.set_status(false)?;
            std::thread::sleep(pattern.pulse);
        }
        Ok(())
    }
}

impl<S: SignalOutput + ?Sized> SignalOutput for Box<S> {
    fn set_status(&mut self, on: bool) -> Result<()> {
        (**self).set_status(on)
    }

    fn set_flash(&mut self, on: bool) -> Result<()> {
        (**self).set_flash(on)
    }

    fn play(&mut self, pattern: Pattern) -> Result<()> {
        (**self).play(pattern)
    }
}

/// Output for hosts without LEDs: every change is logged.
#[derive(Debug, Default)]
pub struct LogSignal;

impl SignalOutput for LogSignal {
    fn set_status(&mut self, on: bool) -> Result<()> {
        log::trace!("signal: status led {}", if on { "on" } else { "off" });
        Ok(())
    }

    fn set_flash(&mut self, on: bool) -> Result<()> {
        log::debug!("signal: flash {}", if on { "on" } else { "off" });
        Ok(())
    }
}

/// LEDs exposed through sysfs brightness files
/// (e.g. `/sys/class/leds/status/brightness`).
#[derive(Debug)]
pub struct SysfsSignal {
    status_path: PathBuf,
    flash_path: Option<PathBuf>,
}

impl SysfsSignal {
    pub fn new(status_path: PathBuf, flash_path: Option<PathBuf>) -> Self {
        Self {
            status_path,
            flash_path,
        }
    }
}

fn write_brightness(path: &Path, on: bool) -> Result<()> {
    std::fs::write(path, if on { b"1\n" } else { b"0\n" })
        .with_context(|| format!("write led brightness {}", path.display()))
}

impl SignalOutput for SysfsSignal {
    fn set_status(&mut self, on: bool) -> Result<()> {
        write_brightness(&self.status_path, on)
    }

    fn set_flash(&mut self, on: bool) -> Result<()> {
        match &self.flash_path {
            Some(path) => write_brightness(path, on),
            None => Ok(()),
        }
    }
}
