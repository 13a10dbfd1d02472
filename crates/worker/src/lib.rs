pub mod config;
pub mod liveness;
pub mod metrics;
pub mod service;
pub mod state;

pub use config::WorkerConfig;
pub use liveness::ParentWatchdog;
pub use service::{StopReason, TaskOutcome, TrackingWorker, WorkerExit, WorkerIpc, WorkerStats};
pub use state::{WorkerPhase, WorkerState};
