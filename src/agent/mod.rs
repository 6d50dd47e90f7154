//! Device-side capture loop.
//!
//! One cycle is `Idle -> Polling -> Capturing -> Uploading -> Reporting -> Idle`,
//! with `Error` reachable from capture and upload. Cycles run strictly one
//! after another on the calling thread. Everything a cycle learns from the
//! poll travels through it as an owned `PendingCapture` / `CapturedImage`.

pub mod camera;
pub mod signal;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::mailbox::{Mode, PollResponse};
use crate::outcome::{CaptureOutcome, OutcomeKind};

use camera::Camera;
use signal::{pattern_for, Signal, SignalOutput};
use transport::{CycleError, ServerTransport};

const SHUTDOWN_CHECK: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Polling,
    Capturing,
    Uploading,
    Reporting,
    Error,
}

/// What the mailbox asked for, carried from `Polling` into `Capturing`.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingCapture {
    pub mode: Mode,
    pub subject_name: Option<String>,
}

/// One acquired frame and the command it answers.
#[derive(Clone, Debug, PartialEq)]
pub struct CapturedImage {
    pub mode: Mode,
    pub subject_name: Option<String>,
    pub image: Vec<u8>,
}

/// How a single cycle ended.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleReport {
    NoCommand,
    PollFailed,
    CaptureFailed,
    UploadFailed,
    MalformedResponse,
    Reported(CaptureOutcome),
}

pub struct CaptureAgent<T, C, S> {
    transport: T,
    camera: C,
    signal: S,
    poll_interval: Duration,
    state: AgentState,
}

impl<T, C, S> CaptureAgent<T, C, S>
where
    T: ServerTransport,
    C: Camera,
    S: SignalOutput,
{
    pub fn new(transport: T, camera: C, signal: S, poll_interval: Duration) -> Self {
        Self {
            transport,
            camera,
            signal,
            poll_interval,
            state: AgentState::Idle,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn signal_output(&self) -> &S {
        &self.signal
    }

    /// Checks the server once and shows the link pattern. Returns whether
    /// the server answered; the loop runs either way.
    pub fn startup(&mut self) -> bool {
        match self.transport.health() {
            Ok(()) => {
                log::info!("relay server reachable");
                self.show(Signal::LinkEstablished);
                true
            }
            Err(err) => {
                log::warn!("relay server unreachable at startup: {}", err);
                self.show(Signal::LinkFailed);
                false
            }
        }
    }

    /// Runs cycles until `shutdown` is set, sleeping `poll_interval` between them.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            self.run_cycle();
            self.idle(shutdown);
        }
        log::info!("capture agent stopped");
    }

    pub fn run_cycle(&mut self) -> CycleReport {
        let report = self.cycle();
        self.transition(AgentState::Idle);
        report
    }

    fn cycle(&mut self) -> CycleReport {
        self.transition(AgentState::Polling);
        let pending = match self.transport.poll() {
            Ok(PollResponse::NoCommand) => return CycleReport::NoCommand,
            Ok(PollResponse::Capture { mode, student_name }) => PendingCapture {
                mode,
                subject_name: student_name,
            },
            Err(err) => {
                log::warn!("poll failed: {}", err);
                return CycleReport::PollFailed;
            }
        };
        log::info!(
            "capture command received: mode={} name={}",
            pending.mode,
            pending.subject_name.as_deref().unwrap_or("-")
        );

        self.transition(AgentState::Capturing);
        let captured = match self.capture(pending) {
            Ok(captured) => captured,
            Err(err) => {
                log::error!("{}", err);
                self.transition(AgentState::Error);
                self.show(Signal::Outcome(OutcomeKind::Error));
                return CycleReport::CaptureFailed;
            }
        };

        self.transition(AgentState::Uploading);
        let body = match self.transport.upload(&captured) {
            Ok(body) => body,
            Err(err) => {
                log::error!("upload failed: {}", err);
                self.transition(AgentState::Error);
                self.show(Signal::UploadFailed);
                return CycleReport::UploadFailed;
            }
        };

        self.transition(AgentState::Reporting);
        let outcome = match serde_json::from_str::<CaptureOutcome>(&body) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("{}", CycleError::Malformed(err.to_string()));
                return CycleReport::MalformedResponse;
            }
        };
        log_outcome(&outcome);
        self.show(Signal::Outcome(outcome.kind()));
        CycleReport::Reported(outcome)
    }

    fn capture(&mut self, pending: PendingCapture) -> Result<CapturedImage, CycleError> {
        if let Err(err) = self.signal.set_flash(true) {
            log::warn!("flash on failed: {:#}", err);
        }
        let frame = self.camera.capture();
        if let Err(err) = self.signal.set_flash(false) {
            log::warn!("flash off failed: {:#}", err);
        }
        let image = frame.map_err(|err| CycleError::Capture(format!("{:#}", err)))?;
        log::debug!("captured {} bytes", image.len());
        Ok(CapturedImage {
            mode: pending.mode,
            subject_name: pending.subject_name,
            image,
        })
    }

    fn show(&mut self, signal: Signal) {
        if let Err(err) = self.signal.play(pattern_for(signal)) {
            log::warn!("signal {:?} failed: {:#}", signal, err);
        }
    }

    fn idle(&self, shutdown: &AtomicBool) {
        let mut remaining = self.poll_interval;
        while !remaining.is_zero() && !shutdown.load(Ordering::SeqCst) {
            let step = remaining.min(SHUTDOWN_CHECK);
            std::thread::sleep(step);
            remaining -= step;
        }
    }

    fn transition(&mut self, next: AgentState) {
        if self.state != next {
            log::debug!("agent state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

fn log_outcome(outcome: &CaptureOutcome) {
    match outcome {
        CaptureOutcome::Success {
            name, confidence, ..
        } => log::info!("attendance logged: {} (confidence {:.2})", name, confidence),
        CaptureOutcome::Registered { name } => log::info!("registered: {}", name),
        CaptureOutcome::Duplicate { name, message } => log::info!("duplicate: {} ({})", name, message),
        CaptureOutcome::Unknown { message } => log::info!("unknown face: {}", message),
        CaptureOutcome::Error { message } => log::warn!("server error: {}", message),
    }
}
