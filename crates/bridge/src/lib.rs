pub mod clock;
pub mod control;
pub mod errors;
pub mod header;
pub mod paths;
pub mod queue;
pub mod ring;
pub mod semaphore;
pub mod shm;
pub mod trace_context;
pub mod types;

pub use clock::monotonic_seconds;
pub use control::{ControlMode, WorkerControl};
pub use errors::BridgeError;
pub use header::{EMPTY_GENERATION, RingKind, RingLayout, WRITING_GENERATION};
pub use paths::IpcNames;
pub use queue::{
    MessageQueue, QueueReceiver, QueueRole, QueueSender, ResultReceiver, ResultSender,
    TaskReceiver, TaskSender,
};
pub use ring::{ReadOutcome, SlotRing};
pub use semaphore::{PermitGuard, SemaphoreError, SlotSemaphore};
pub use trace_context::TraceContext;
pub use types::{
    DiagnosticLevel, FrameTask, ResultMessage, StentorState, TaskMessage, TrackState,
    WorkerMessage,
};
