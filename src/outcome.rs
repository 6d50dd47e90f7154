use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Terminal classification of one capture cycle.
///
/// Serialized with a `status` tag; the field set of each variant is the
/// JSON body returned by `/recognize` and `/command/result`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CaptureOutcome {
    Success {
        name: String,
        confidence: f64,
        record_id: i64,
        timestamp: String,
    },
    Registered {
        name: String,
    },
    Duplicate {
        name: String,
        message: String,
    },
    Unknown {
        message: String,
    },
    Error {
        message: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    Registered,
    Duplicate,
    Unknown,
    Error,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 5] = [
        OutcomeKind::Success,
        OutcomeKind::Registered,
        OutcomeKind::Duplicate,
        OutcomeKind::Unknown,
        OutcomeKind::Error,
    ];
}

impl CaptureOutcome {
    pub fn unknown() -> Self {
        CaptureOutcome::Unknown {
            message: "Face not recognized".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        CaptureOutcome::Error {
            message: message.into(),
        }
    }

    pub fn duplicate(name: &str, window: Duration) -> Self {
        let secs = window.as_secs();
        let window = if secs >= 60 && secs % 60 == 0 {
            format!("{} minutes", secs / 60)
        } else {
            format!("{} seconds", secs)
        };
        CaptureOutcome::Duplicate {
            name: name.to_string(),
            message: format!("Already logged within {}", window),
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            CaptureOutcome::Success { .. } => OutcomeKind::Success,
            CaptureOutcome::Registered { .. } => OutcomeKind::Registered,
            CaptureOutcome::Duplicate { .. } => OutcomeKind::Duplicate,
            CaptureOutcome::Unknown { .. } => OutcomeKind::Unknown,
            CaptureOutcome::Error { .. } => OutcomeKind::Error,
        }
    }

    pub fn subject_name(&self) -> Option<&str> {
        match self {
            CaptureOutcome::Success { name, .. }
            | CaptureOutcome::Registered { name }
            | CaptureOutcome::Duplicate { name, .. } => Some(name),
            CaptureOutcome::Unknown { .. } | CaptureOutcome::Error { .. } => None,
        }
    }

    /// Only populated for `Success`.
    pub fn confidence(&self) -> Option<f64> {
        match self {
            CaptureOutcome::Success { confidence, .. } => Some(*confidence),
            _ => None,
        }
    }
}
