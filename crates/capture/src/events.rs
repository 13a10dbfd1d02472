use bridge::{DiagnosticLevel, FrameTask, ResultMessage, StentorState, TrackState};
use std::path::PathBuf;

/// Published once the first frame fixed the ring geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmReady {
    pub frame_ring: PathBuf,
    /// `(height, width, channels)`
    pub frame_shape: (u32, u32, u32),
    pub mask_ring: PathBuf,
    /// `(height, width)`
    pub mask_shape: (u32, u32),
    /// Byte offset of the generation array inside each ring file.
    pub generation_offset: usize,
    pub capacity: u32,
    pub semaphore: String,
}

/// Pipeline events for collaborators. Every method defaults to doing
/// nothing; implementations must not block, they run on pipeline threads.
pub trait PipelineObserver: Send + Sync {
    fn on_shm_ready(&self, _ready: &ShmReady) {}

    fn on_cv_task(&self, _task: &FrameTask) {}

    fn on_results_ready(&self, _results: &ResultMessage) {}

    fn on_log(&self, _level: DiagnosticLevel, _message: &str) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_shm_ready(&self, ready: &ShmReady) {
        tracing::info!(
            frame_ring = %ready.frame_ring.display(),
            mask_ring = %ready.mask_ring.display(),
            shape = ?ready.frame_shape,
            capacity = ready.capacity,
            "Shared memory ready"
        );
    }

    fn on_cv_task(&self, task: &FrameTask) {
        tracing::trace!(
            frame_index = task.frame_index,
            slot = task.slot_index,
            "Frame submitted for tracking"
        );
    }

    fn on_results_ready(&self, results: &ResultMessage) {
        tracing::trace!(
            frame_index = results.frame_index,
            tracks = results.results.len(),
            mask_slot = ?results.mask_slot,
            "Results ready"
        );
    }

    fn on_log(&self, level: DiagnosticLevel, message: &str) {
        match level {
            DiagnosticLevel::Error => tracing::error!(source = "worker", "{message}"),
            DiagnosticLevel::Warning => tracing::warn!(source = "worker", "{message}"),
            DiagnosticLevel::Info => tracing::info!(source = "worker", "{message}"),
            DiagnosticLevel::Debug => tracing::debug!(source = "worker", "{message}"),
        }
    }
}

/// Persistence collaborator. Fire and forget.
pub trait FrameLogger: Send + Sync {
    fn log_frame(&self, results: &[StentorState], frame_index: u64, timestamp: f64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFrameLogger;

impl FrameLogger for TracingFrameLogger {
    fn log_frame(&self, results: &[StentorState], frame_index: u64, timestamp: f64) {
        let count = |state| results.iter().filter(|r| r.state == state).count();
        tracing::debug!(
            frame_index,
            timestamp,
            tracks = results.len(),
            extended = count(TrackState::Extended),
            contracted = count(TrackState::Contracted),
            undetermined = count(TrackState::Undetermined),
            edge = results.iter().filter(|r| r.edge_reflection).count(),
            "Frame tracked"
        );
        for contracted in results.iter().filter(|r| r.state == TrackState::Contracted) {
            tracing::info!(
                id = contracted.id,
                frame_index,
                circularity = contracted.circularity,
                "Contraction"
            );
        }
    }
}
