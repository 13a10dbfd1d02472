use crate::trace_context::TraceContext;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified posture of a tracked organism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TrackState {
    Extended,
    Contracted,
    Undetermined,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackState::Extended => "EXTENDED",
            TrackState::Contracted => "CONTRACTED",
            TrackState::Undetermined => "UNDETERMINED",
        }
    }

    /// Overlay colour, RGB.
    pub fn color(&self) -> [u8; 3] {
        match self {
            TrackState::Extended => [0, 255, 0],
            TrackState::Contracted => [255, 0, 0],
            TrackState::Undetermined => [255, 255, 0],
        }
    }
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one track in one processed frame. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StentorState {
    pub id: u64,
    pub centroid: (f64, f64),
    pub area: f64,
    pub circularity: f64,
    pub state: TrackState,
    pub timestamp: f64,
    pub debug_color: [u8; 3],
    pub edge_reflection: bool,
}

/// Work item for the tracking worker. The pixels stay in the frame ring.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FrameTask {
    pub frame_index: u64,
    pub timestamp: f64,
    pub slot_index: u32,
    pub trace: Option<TraceContext>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum TaskMessage {
    Frame(FrameTask),
    /// Sentinel that ends the worker loop even while it is waiting.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResultMessage {
    pub results: Vec<StentorState>,
    pub frame_index: u64,
    pub timestamp: f64,
    pub slot_index: u32,
    /// Mask ring slot holding this frame's mask, if one was written.
    pub mask_slot: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl DiagnosticLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticLevel::Debug => "debug",
            DiagnosticLevel::Info => "info",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Error => "error",
        }
    }
}

/// Everything the worker sends back to the main process.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum WorkerMessage {
    Detection(ResultMessage),
    Diagnostic {
        level: DiagnosticLevel,
        message: String,
    },
    Fatal {
        reason: String,
    },
}

impl WorkerMessage {
    pub fn diagnostic(level: DiagnosticLevel, message: impl Into<String>) -> Self {
        WorkerMessage::Diagnostic {
            level,
            message: message.into(),
        }
    }
}
