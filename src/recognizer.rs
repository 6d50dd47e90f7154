//! Decision engine for uploaded captures.
//!
//! One `Probe` in, exactly one `CaptureOutcome` out. Every outcome,
//! including failures, is published to the result cache before it is
//! returned, so the dispatcher always sees the last completed cycle.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::attendance::AttendanceLog;
use crate::dedup::{Admission, DedupGuard};
use crate::encode::FaceEncoder;
use crate::gallery::{canonical_name, Gallery, GalleryStore};
use crate::mailbox::{Mode, ResultCache};
use crate::matcher::MatchEngine;
use crate::outcome::CaptureOutcome;

type Clock = Box<dyn Fn() -> SystemTime + Send + Sync>;

/// One uploaded capture.
#[derive(Clone, Debug)]
pub struct Probe {
    pub image: Vec<u8>,
    pub mode: Mode,
    pub subject_name: Option<String>,
}

impl Probe {
    pub fn attendance(image: impl Into<Vec<u8>>) -> Self {
        Self {
            image: image.into(),
            mode: Mode::Attendance,
            subject_name: None,
        }
    }

    pub fn register(image: impl Into<Vec<u8>>, subject_name: &str) -> Self {
        Self {
            image: image.into(),
            mode: Mode::Register,
            subject_name: Some(subject_name.to_string()),
        }
    }
}

pub struct Recognizer {
    encoder: Arc<dyn FaceEncoder>,
    gallery: Arc<Gallery>,
    engine: MatchEngine,
    dedup: DedupGuard,
    attendance: Mutex<Box<dyn AttendanceLog>>,
    store: Option<GalleryStore>,
    results: Arc<ResultCache>,
    clock: Clock,
}

impl Recognizer {
    pub fn new(
        encoder: Arc<dyn FaceEncoder>,
        engine: MatchEngine,
        dedup: DedupGuard,
        attendance: Box<dyn AttendanceLog>,
    ) -> Self {
        Self {
            encoder,
            gallery: Arc::new(Gallery::new()),
            engine,
            dedup,
            attendance: Mutex::new(attendance),
            store: None,
            results: Arc::new(ResultCache::new()),
            clock: Box::new(SystemTime::now),
        }
    }

    pub fn with_gallery(mut self, gallery: Arc<Gallery>) -> Self {
        self.gallery = gallery;
        self
    }

    /// Persists registrations to, and reloads from, `store`.
    pub fn with_store(mut self, store: GalleryStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_results(mut self, results: Arc<ResultCache>) -> Self {
        self.results = results;
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn gallery(&self) -> &Arc<Gallery> {
        &self.gallery
    }

    pub fn results(&self) -> &Arc<ResultCache> {
        &self.results
    }

    /// Classifies `probe` and publishes the outcome.
    pub fn recognize(&self, probe: Probe) -> CaptureOutcome {
        log::info!(
            "recognizer: received image ({} bytes), mode={}",
            probe.image.len(),
            probe.mode
        );
        let outcome = self.decide(probe).unwrap_or_else(|err| {
            log::warn!("recognizer: capture failed: {:#}", err);
            CaptureOutcome::error(err.to_string())
        });
        self.publish(outcome)
    }

    /// Publishes an `Error` outcome for a request that never reached matching.
    pub fn reject(&self, message: impl Into<String>) -> CaptureOutcome {
        let outcome = CaptureOutcome::error(message);
        log::warn!("recognizer: rejected capture: {:?}", outcome);
        self.publish(outcome)
    }

    /// Rebuilds the gallery from the known-faces directory.
    pub fn reload(&self) -> Result<Vec<String>> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| anyhow!("no known faces directory configured"))?;
        let fresh = store.load(self.encoder.as_ref())?;
        self.gallery.replace_all(fresh)?;
        let names = self.gallery.names()?;
        log::info!("recognizer: loaded {} known face(s)", names.len());
        Ok(names)
    }

    /// Seeds the dedup guard from attendance events still inside the window.
    pub fn seed_dedup(&self) -> Result<usize> {
        let now = (self.clock)();
        let cutoff = now.checked_sub(self.dedup.window()).unwrap_or(SystemTime::UNIX_EPOCH);
        let records = self
            .attendance
            .lock()
            .map_err(|_| anyhow!("attendance log lock poisoned"))?
            .since(cutoff)?;
        for record in &records {
            self.dedup.seed(&record.subject_name, record.recorded_at)?;
        }
        Ok(records.len())
    }

    fn decide(&self, probe: Probe) -> Result<CaptureOutcome> {
        if probe.image.is_empty() {
            return Ok(CaptureOutcome::error("No image data received"));
        }
        match probe.mode {
            Mode::Register => {
                let name = canonical_name(probe.subject_name.as_deref().unwrap_or(""));
                if name.is_empty() {
                    return Ok(CaptureOutcome::error(
                        "Student name required for registration",
                    ));
                }
                self.register(&name, &probe.image)
            }
            Mode::Attendance => self.attend(&probe.image),
        }
    }

    fn register(&self, name: &str, image: &[u8]) -> Result<CaptureOutcome> {
        let Some(encoding) = self.encoder.encode(image)? else {
            return Ok(CaptureOutcome::error("Could not detect face in the image"));
        };
        let replaced = self.gallery.upsert_with(name, encoding, || match &self.store {
            Some(store) => store.save(name, image).map(|_| ()),
            None => Ok(()),
        })?;
        if replaced.is_some() {
            log::info!("recognizer: replaced reference encoding for '{}'", name);
        } else {
            log::info!("recognizer: registered '{}'", name);
        }
        Ok(CaptureOutcome::Registered {
            name: name.to_string(),
        })
    }

    fn attend(&self, image: &[u8]) -> Result<CaptureOutcome> {
        let Some(encoding) = self.encoder.encode(image)? else {
            log::info!("recognizer: no face detected in capture");
            return Ok(CaptureOutcome::unknown());
        };
        let Some(candidate) = self.engine.best_match(&encoding, &self.gallery)? else {
            return Ok(CaptureOutcome::unknown());
        };

        let now = (self.clock)();
        let confidence = candidate.confidence();
        let name = candidate.subject_name;
        let admission = self.dedup.admit_with(&name, now, || {
            self.attendance
                .lock()
                .map_err(|_| anyhow!("attendance log lock poisoned"))?
                .record(&name, confidence, now)
        })?;

        match admission {
            Admission::Accepted(record_id) => {
                log::info!(
                    "recognizer: attendance accepted for '{}' (confidence {:.2}%, record {})",
                    name,
                    confidence * 100.0,
                    record_id
                );
                Ok(CaptureOutcome::Success {
                    name,
                    confidence,
                    record_id,
                    timestamp: chrono::DateTime::<chrono::Local>::from(now).to_rfc3339(),
                })
            }
            Admission::Duplicate { .. } => {
                log::info!("recognizer: duplicate attendance for '{}'", name);
                Ok(CaptureOutcome::duplicate(&name, self.dedup.window()))
            }
        }
    }

    fn publish(&self, outcome: CaptureOutcome) -> CaptureOutcome {
        if let Err(err) = self.results.publish(outcome.clone()) {
            log::error!("recognizer: failed to cache outcome: {}", err);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::{AttendanceRecord, InMemoryAttendanceLog};
    use crate::encode::StubEncoder;
    use crate::outcome::OutcomeKind;
    use std::time::Duration;

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    struct ManualClock(Arc<Mutex<SystemTime>>);

    impl ManualClock {
        fn new(start: SystemTime) -> Self {
            Self(Arc::new(Mutex::new(start)))
        }

        fn set(&self, now: SystemTime) {
            *self.0.lock().unwrap() = now;
        }

        fn reader(&self) -> impl Fn() -> SystemTime + Send + Sync + 'static {
            let inner = self.0.clone();
            move || *inner.lock().unwrap()
        }
    }

    fn recognizer(clock: &ManualClock) -> Recognizer {
        Recognizer::new(
            Arc::new(StubEncoder),
            MatchEngine::new(0.6).unwrap(),
            DedupGuard::new(Duration::from_secs(300)),
            Box::new(InMemoryAttendanceLog::new()),
        )
        .with_clock(clock.reader())
    }

    #[test]
    fn matching_probe_succeeds_with_confidence() {
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock);
        r.gallery().upsert("A", vec![0.3, 0.0]).unwrap();

        let outcome = r.recognize(Probe::attendance("0,0"));
        match &outcome {
            CaptureOutcome::Success {
                name,
                confidence,
                record_id,
                ..
            } => {
                assert_eq!(name, "A");
                assert!((confidence - 0.7).abs() < 1e-6);
                assert_eq!(*record_id, 1);
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(r.results().latest().unwrap(), Some(outcome));
    }

    #[test]
    fn repeat_within_window_is_duplicate_then_success_after() {
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock);
        r.gallery().upsert("A", vec![0.1]).unwrap();

        assert_eq!(r.recognize(Probe::attendance("0")).kind(), OutcomeKind::Success);

        clock.set(t(120));
        let dup = r.recognize(Probe::attendance("0"));
        assert_eq!(dup.kind(), OutcomeKind::Duplicate);
        assert_eq!(dup.subject_name(), Some("A"));
        assert_eq!(dup.confidence(), None);

        clock.set(t(300));
        assert_eq!(r.recognize(Probe::attendance("0")).kind(), OutcomeKind::Success);
    }

    #[test]
    fn back_to_back_subjects_are_classified_independently() {
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock);
        r.gallery().upsert("A", vec![0.3, 5.0]).unwrap();
        r.gallery().upsert("B", vec![5.0, 0.8]).unwrap();

        let a = r.recognize(Probe::attendance("0,5"));
        let b = r.recognize(Probe::attendance("5,0"));
        assert_eq!(a.kind(), OutcomeKind::Success);
        assert_eq!(a.subject_name(), Some("A"));
        assert_eq!(b.kind(), OutcomeKind::Unknown);
    }

    #[test]
    fn empty_gallery_yields_unknown() {
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock);
        assert_eq!(r.recognize(Probe::attendance("0.1,0.2")), CaptureOutcome::unknown());
    }

    #[test]
    fn no_face_is_unknown_for_attendance_and_error_for_register() {
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock);
        assert_eq!(r.recognize(Probe::attendance(" ")).kind(), OutcomeKind::Unknown);
        assert_eq!(
            r.recognize(Probe::register(" ", "Ana")),
            CaptureOutcome::error("Could not detect face in the image")
        );
    }

    #[test]
    fn register_overwrites_previous_reference() {
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock);

        assert_eq!(
            r.recognize(Probe::register("0,0", "X")),
            CaptureOutcome::Registered {
                name: "X".to_string()
            }
        );
        r.recognize(Probe::register("9,9", "X"));

        assert_eq!(r.gallery().len().unwrap(), 1);
        assert_eq!(r.recognize(Probe::attendance("0,0")).kind(), OutcomeKind::Unknown);
        assert_eq!(r.recognize(Probe::attendance("9,9")).kind(), OutcomeKind::Success);
    }

    #[test]
    fn register_never_touches_dedup_state() {
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock);
        r.recognize(Probe::register("1,1", "X"));
        assert!(r.dedup.is_empty().unwrap());
    }

    #[test]
    fn invalid_probes_become_error_outcomes() {
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock);
        assert_eq!(
            r.recognize(Probe::attendance(Vec::new())),
            CaptureOutcome::error("No image data received")
        );
        assert_eq!(
            r.recognize(Probe {
                image: b"1".to_vec(),
                mode: Mode::Register,
                subject_name: None,
            }),
            CaptureOutcome::error("Student name required for registration")
        );
        assert_eq!(
            r.recognize(Probe::attendance("not-a-face")).kind(),
            OutcomeKind::Error
        );
        assert_eq!(r.results().latest().unwrap().map(|o| o.kind()), Some(OutcomeKind::Error));
    }

    #[test]
    fn reject_is_cached() {
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock);
        r.reject("unsupported capture mode 'logout'");
        assert_eq!(
            r.results().latest().unwrap(),
            Some(CaptureOutcome::error("unsupported capture mode 'logout'"))
        );
    }

    struct FailingLog;

    impl AttendanceLog for FailingLog {
        fn record(&mut self, _: &str, _: f64, _: SystemTime) -> Result<i64> {
            Err(anyhow!("database is locked"))
        }

        fn since(&mut self, _: SystemTime) -> Result<Vec<AttendanceRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn log_failure_is_an_error_and_does_not_consume_the_window() {
        let r = Recognizer::new(
            Arc::new(StubEncoder),
            MatchEngine::default(),
            DedupGuard::default(),
            Box::new(FailingLog),
        );
        r.gallery().upsert("A", vec![0.0]).unwrap();
        assert_eq!(
            r.recognize(Probe::attendance("0")),
            CaptureOutcome::error("database is locked")
        );
        assert!(r.dedup.is_empty().unwrap());
    }

    #[test]
    fn seeds_dedup_from_recent_log_entries() {
        let clock = ManualClock::new(t(1000));
        let mut log = InMemoryAttendanceLog::new();
        log.record("Old", 0.9, t(100)).unwrap();
        log.record("Recent", 0.9, t(900)).unwrap();
        let r = Recognizer::new(
            Arc::new(StubEncoder),
            MatchEngine::default(),
            DedupGuard::new(Duration::from_secs(300)),
            Box::new(log),
        )
        .with_clock(clock.reader());
        r.gallery().upsert("Recent", vec![0.0]).unwrap();

        assert_eq!(r.seed_dedup().unwrap(), 1);
        assert_eq!(r.recognize(Probe::attendance("0")).kind(), OutcomeKind::Duplicate);
    }

    #[test]
    fn reload_replaces_gallery_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("Ana_Cruz.jpg"), b"0.5,0.5").unwrap();
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock).with_store(store);
        r.gallery().upsert("Stale", vec![1.0, 1.0]).unwrap();

        assert_eq!(r.reload().unwrap(), vec!["Ana Cruz"]);
        assert_eq!(r.gallery().get("Stale").unwrap(), None);
    }

    #[test]
    fn registration_is_persisted_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock).with_store(store);

        r.recognize(Probe::register("0.25,0.75", "Ben Ong"));
        let saved = std::fs::read(dir.path().join("Ben_Ong.jpg")).unwrap();
        assert_eq!(saved, b"0.25,0.75");
    }

    #[test]
    fn rejected_registration_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock).with_store(store);

        assert_eq!(r.recognize(Probe::register("0,0", "A")).kind(), OutcomeKind::Registered);
        assert_eq!(r.recognize(Probe::register("1,2,3", "B")).kind(), OutcomeKind::Error);
        assert!(!dir.path().join("B.jpg").exists());

        assert_eq!(r.reload().unwrap(), vec!["A"]);
        assert_ne!(r.recognize(Probe::attendance("1,2,3")).kind(), OutcomeKind::Success);
    }

    #[test]
    fn registered_name_matches_name_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let clock = ManualClock::new(t(0));
        let r = recognizer(&clock).with_store(store);

        assert_eq!(
            r.recognize(Probe::register("0.5,0.5", " Ana_Cruz ")),
            CaptureOutcome::Registered {
                name: "Ana Cruz".to_string()
            }
        );
        assert_eq!(r.gallery().names().unwrap(), vec!["Ana Cruz"]);
        assert_eq!(r.reload().unwrap(), vec!["Ana Cruz"]);
    }
}
