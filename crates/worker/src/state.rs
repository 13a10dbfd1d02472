use thiserror::Error;

/// Lifecycle of the tracking worker. Each task runs
/// `Running -> Validating -> Processing -> Publishing -> Running`; a torn
/// read skips `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Starting,
    Running,
    Validating,
    Processing,
    Publishing,
    Stopping,
    Stopped,
}

impl WorkerPhase {
    pub fn can_transition(self, next: WorkerPhase) -> bool {
        use WorkerPhase::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Stopping)
                | (Running, Validating)
                | (Running, Stopping)
                | (Validating, Processing)
                | (Validating, Publishing)
                | (Processing, Publishing)
                | (Publishing, Running)
                | (Stopping, Stopped)
        )
    }

    /// `Some(next)` when the move is legal.
    pub fn transition(self, next: WorkerPhase) -> Option<WorkerPhase> {
        self.can_transition(next).then_some(next)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("illegal worker transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: WorkerPhase,
    pub to: WorkerPhase,
}

pub struct WorkerState {
    phase: WorkerPhase,
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            phase: WorkerPhase::Starting,
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    pub fn advance(&mut self, next: WorkerPhase) -> Result<(), InvalidTransition> {
        match self.phase.transition(next) {
            Some(phase) => {
                tracing::trace!(from = ?self.phase, to = ?phase, "Worker phase");
                self.phase = phase;
                Ok(())
            }
            None => Err(InvalidTransition {
                from: self.phase,
                to: next,
            }),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == WorkerPhase::Stopped
    }
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}
