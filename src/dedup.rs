use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

/// Default cool-down between two accepted attendance events for one subject.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Result of asking the guard to admit an attendance event.
#[derive(Debug, PartialEq)]
pub enum Admission<T> {
    Accepted(T),
    Duplicate { last_accepted_at: SystemTime },
}

/// Last acceptance for one subject; `None` until an `accept` succeeds.
type Slot = Arc<Mutex<Option<SystemTime>>>;

/// Per-subject cool-down for attendance events.
///
/// Each subject has its own slot lock. Check-then-set and the acceptance
/// side effect run under that lock only, so two recognitions of the same
/// subject are serialised while different subjects proceed in parallel.
/// The map lock is held just long enough to find or create a slot.
/// Expired slots nobody is using are swept on every admission.
#[derive(Debug)]
pub struct DedupGuard {
    window: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl DedupGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records an acceptance that happened elsewhere (e.g. before a restart).
    pub fn seed(&self, subject_name: &str, accepted_at: SystemTime) -> Result<()> {
        let slot = self.slot(subject_name, None)?;
        let mut last = lock_slot(&slot)?;
        if (*last).map_or(true, |last| accepted_at > last) {
            *last = Some(accepted_at);
        }
        Ok(())
    }

    /// Admits `subject_name` at `now` unless it was accepted within the window.
    ///
    /// `accept` runs while this subject's slot is held and the acceptance is
    /// only recorded when it succeeds; a failed `accept` leaves the state
    /// untouched.
    pub fn admit_with<T>(
        &self,
        subject_name: &str,
        now: SystemTime,
        accept: impl FnOnce() -> Result<T>,
    ) -> Result<Admission<T>> {
        let slot = self.slot(subject_name, Some(now))?;
        let mut last = lock_slot(&slot)?;
        if let Some(last_accepted_at) = *last {
            if self.within_window(last_accepted_at, now) {
                return Ok(Admission::Duplicate { last_accepted_at });
            }
        }
        let value = accept()?;
        *last = Some(now);
        Ok(Admission::Accepted(value))
    }

    pub fn admit(&self, subject_name: &str, now: SystemTime) -> Result<bool> {
        Ok(matches!(
            self.admit_with(subject_name, now, || Ok(()))?,
            Admission::Accepted(())
        ))
    }

    pub fn last_accepted(&self, subject_name: &str) -> Result<Option<SystemTime>> {
        let slot = match self.lock()?.get(subject_name) {
            Some(slot) => slot.clone(),
            None => return Ok(None),
        };
        let last = *lock_slot(&slot)?;
        Ok(last)
    }

    /// Number of subjects with a recorded acceptance.
    pub fn len(&self) -> Result<usize> {
        let slots: Vec<Slot> = self.lock()?.values().cloned().collect();
        let mut accepted = 0;
        for slot in &slots {
            if lock_slot(slot)?.is_some() {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Finds or creates the slot for `subject_name`. With `sweep_at`, idle
    /// slots whose acceptance is outside the window are dropped first.
    fn slot(&self, subject_name: &str, sweep_at: Option<SystemTime>) -> Result<Slot> {
        let mut slots = self.lock()?;
        if let Some(now) = sweep_at {
            // Only the map holds an idle slot, and nobody can clone one
            // while the map lock is held.
            slots.retain(|_, slot| {
                if Arc::strong_count(slot) > 1 {
                    return true;
                }
                match slot.try_lock() {
                    Ok(last) => (*last).is_some_and(|last| self.within_window(last, now)),
                    Err(_) => true,
                }
            });
        }
        Ok(slots.entry(subject_name.to_string()).or_default().clone())
    }

    fn within_window(&self, last: SystemTime, now: SystemTime) -> bool {
        // Clock skew backwards counts as zero elapsed.
        let elapsed = now.duration_since(last).unwrap_or(Duration::ZERO);
        elapsed < self.window
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Slot>>> {
        self.slots.lock().map_err(|_| anyhow!("dedup lock poisoned"))
    }
}

fn lock_slot(slot: &Slot) -> Result<MutexGuard<'_, Option<SystemTime>>> {
    slot.lock().map_err(|_| anyhow!("dedup slot lock poisoned"))
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
