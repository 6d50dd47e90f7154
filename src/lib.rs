//! Attendance relay
//!
//! Links a NAT-isolated capture device to an operator dashboard through a
//! server neither side can reach in both directions. The device only polls;
//! the dashboard only talks to the server.
//!
//! # Module Structure
//!
//! - `mailbox`: single-slot command mailbox and the latest-result cache
//! - `outcome`: the closed set of capture outcomes and their wire form
//! - `gallery` / `encode` / `matcher`: reference encodings, the encoder
//!   seam and nearest-neighbour matching
//! - `dedup` / `attendance`: per-subject cool-down and the event log
//! - `recognizer`: the decision engine tying the above together
//! - `api`: HTTP surface for the dashboard and the device
//! - `agent`: device-side capture loop, camera, transport and status LED
//! - `config`: file + environment configuration for both binaries

pub mod agent;
pub mod api;
pub mod attendance;
pub mod config;
pub mod dedup;
pub mod encode;
pub mod gallery;
pub mod mailbox;
pub mod matcher;
pub mod outcome;
pub mod recognizer;

pub use api::{ApiConfig, ApiHandle, ApiServer, RelayState};
pub use attendance::{AttendanceLog, InMemoryAttendanceLog, SqliteAttendanceLog};
pub use dedup::DedupGuard;
pub use encode::{encoder_for, FaceEncoder};
pub use gallery::{Encoding, Gallery, GalleryEntry, GalleryStore};
pub use mailbox::{Command, Mailbox, Mode, PollResponse, ResultCache};
pub use matcher::{MatchCandidate, MatchEngine};
pub use outcome::{CaptureOutcome, OutcomeKind};
pub use recognizer::{Probe, Recognizer};
