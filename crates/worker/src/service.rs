use crate::config::WorkerConfig;
use crate::liveness::ParentWatchdog;
use crate::metrics::WorkerMetrics;
use crate::state::{WorkerPhase, WorkerState};
use bridge::{
    BridgeError, DiagnosticLevel, FrameTask, IpcNames, PermitGuard, ReadOutcome, ResultMessage,
    ResultSender, RingKind, SlotRing, SlotSemaphore, TaskMessage, TaskReceiver, WorkerControl,
    WorkerMessage,
};
use common::{WaitTimeout, wait_for_resource};
use image::RgbImage;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};
use tracker::{OrganismTracker, TrackerConfig};

/// Every IPC resource the worker uses, all created by the main process.
pub struct WorkerIpc {
    pub frames: SlotRing,
    pub masks: SlotRing,
    pub semaphore: SlotSemaphore,
    pub tasks: TaskReceiver,
    pub results: ResultSender,
    pub control: WorkerControl,
}

impl WorkerIpc {
    pub fn attach(names: &IpcNames) -> Result<Self, BridgeError> {
        let frames = SlotRing::attach(&names.frame_ring, RingKind::Frame)?;
        let masks = SlotRing::attach(&names.mask_ring, RingKind::Mask)?;
        if masks.capacity() != frames.capacity()
            || masks.layout().width != frames.layout().width
            || masks.layout().height != frames.layout().height
        {
            return Err(BridgeError::InvalidLayout(format!(
                "mask ring {:?} does not match frame ring {:?}",
                masks.layout(),
                frames.layout()
            )));
        }
        let semaphore = SlotSemaphore::open(&names.semaphore, frames.layout().capacity)?;
        let tasks = TaskReceiver::open(&names.task_queue)?;
        let results = ResultSender::open(&names.result_queue)?;
        let control = WorkerControl::attach(&names.control)?;
        Ok(Self {
            frames,
            masks,
            semaphore,
            tasks,
            results,
            control,
        })
    }

    /// Attach, retrying until the main process has created everything.
    pub fn wait_attach(
        names: &IpcNames,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Self, WaitTimeout> {
        wait_for_resource(|| Self::attach(names), poll_interval, "Pipeline IPC", timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Published { tracks: usize },
    /// The slot was overwritten before or during the copy.
    Torn,
    Failed,
    /// Processed, but the result could not be delivered.
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub published: u64,
    pub torn: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Tasks still queued when the worker stopped.
    pub abandoned: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Published { .. } => self.published += 1,
            TaskOutcome::Torn => self.torn += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Dropped => self.dropped += 1,
        }
    }

    pub fn handled(&self) -> u64 {
        self.published + self.torn + self.failed + self.dropped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    ControlStop,
    ParentGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub reason: StopReason,
    pub stats: WorkerStats,
}

/// Per-task processing state, owned by the worker and never shared.
struct TaskPipeline {
    tracker: OrganismTracker,
    state: WorkerState,
    metrics: WorkerMetrics,
    frame: RgbImage,
    violations: u64,
}

impl TaskPipeline {
    fn enter(&mut self, phase: WorkerPhase) {
        if self.state.phase() == phase {
            return;
        }
        if let Err(e) = self.state.advance(phase) {
            self.violations += 1;
            tracing::error!(error = %e, "Worker state machine violated");
        }
    }

    fn process(
        &mut self,
        task: &FrameTask,
        frames: &SlotRing,
        masks: &mut SlotRing,
        results: &ResultSender,
    ) -> TaskOutcome {
        let span = tracing::info_span!(
            "track_frame",
            frame_index = task.frame_index,
            slot = task.slot_index
        );
        if let Some(trace) = &task.trace {
            trace.attach_to(&span);
        }
        let _enter = span.enter();
        let start = Instant::now();

        self.enter(WorkerPhase::Validating);
        let slot = task.slot_index as usize;
        let read = {
            let _span = common::span_debug!("ring_copy");
            frames.read_validated(slot, task.frame_index, &mut self.frame)
        };
        match read {
            Ok(ReadOutcome::Valid) => {}
            Ok(ReadOutcome::Torn {
                before,
                after,
                expected,
            }) => {
                self.enter(WorkerPhase::Publishing);
                self.metrics.torn.add(1, &[]);
                report(
                    results,
                    DiagnosticLevel::Warning,
                    format!(
                        "frame {expected} in slot {slot} was overwritten (tag {before} -> {after}), skipped"
                    ),
                );
                return TaskOutcome::Torn;
            }
            Err(e) => {
                self.enter(WorkerPhase::Publishing);
                self.metrics.failures.add(1, &[]);
                report(
                    results,
                    DiagnosticLevel::Error,
                    format!("failed to read frame {} from slot {slot}: {e}", task.frame_index),
                );
                return TaskOutcome::Failed;
            }
        }

        self.enter(WorkerPhase::Processing);
        let tracker = &mut self.tracker;
        let frame = &self.frame;
        let processed =
            panic::catch_unwind(AssertUnwindSafe(|| tracker.process_frame(frame, task.timestamp)));
        self.enter(WorkerPhase::Publishing);

        let analysis = match processed {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => {
                self.metrics.failures.add(1, &[]);
                report(
                    results,
                    DiagnosticLevel::Error,
                    format!("tracking failed on frame {}: {e}", task.frame_index),
                );
                return TaskOutcome::Failed;
            }
            Err(payload) => {
                self.metrics.failures.add(1, &[]);
                report(
                    results,
                    DiagnosticLevel::Error,
                    format!(
                        "tracker panicked on frame {}: {}",
                        task.frame_index,
                        panic_message(payload.as_ref())
                    ),
                );
                return TaskOutcome::Failed;
            }
        };

        let mask_slot = match masks.write(slot, analysis.mask.as_raw(), task.frame_index) {
            Ok(()) => Some(task.slot_index),
            Err(e) => {
                tracing::warn!(error = %e, slot, "Failed to publish mask");
                None
            }
        };

        let tracks = analysis.results.len();
        let message = WorkerMessage::Detection(ResultMessage {
            results: analysis.results,
            frame_index: task.frame_index,
            timestamp: task.timestamp,
            slot_index: task.slot_index,
            mask_slot,
        });

        let outcome = match results.try_send(&message) {
            Ok(true) => {
                self.metrics.frames.add(1, &[]);
                self.metrics.tracks.add(tracks as u64, &[]);
                TaskOutcome::Published { tracks }
            }
            Ok(false) => {
                tracing::warn!(frame_index = task.frame_index, "Result queue full, dropping result");
                self.metrics.dropped_results.add(1, &[]);
                TaskOutcome::Dropped
            }
            Err(BridgeError::PayloadTooLarge { len, max }) => {
                self.metrics.dropped_results.add(1, &[]);
                report(
                    results,
                    DiagnosticLevel::Warning,
                    format!(
                        "result for frame {} with {tracks} tracks is {len} bytes, over the {max} byte message limit",
                        task.frame_index
                    ),
                );
                TaskOutcome::Dropped
            }
            Err(e) => {
                self.metrics.failures.add(1, &[]);
                report(
                    results,
                    DiagnosticLevel::Error,
                    format!("failed to publish result for frame {}: {e}", task.frame_index),
                );
                TaskOutcome::Failed
            }
        };

        self.metrics
            .duration
            .record(start.elapsed().as_secs_f64(), &[]);
        outcome
    }
}

/// Consumes frame tasks, runs the organism tracker on the referenced slot
/// and publishes one result (or diagnostic) per task.
pub struct TrackingWorker {
    ipc: WorkerIpc,
    pipeline: TaskPipeline,
    watchdog: ParentWatchdog,
    poll_interval: Duration,
    stats: WorkerStats,
}

impl TrackingWorker {
    pub fn new(ipc: WorkerIpc, config: &WorkerConfig) -> Self {
        Self::with_parts(
            ipc,
            config.tracker.clone(),
            ParentWatchdog::new(config.parent_pid, config.parent_check_interval),
            config.poll_interval,
        )
    }

    pub fn with_parts(
        ipc: WorkerIpc,
        tracker: TrackerConfig,
        watchdog: ParentWatchdog,
        poll_interval: Duration,
    ) -> Self {
        let layout = *ipc.frames.layout();
        Self {
            ipc,
            pipeline: TaskPipeline {
                tracker: OrganismTracker::new(tracker),
                state: WorkerState::new(),
                metrics: WorkerMetrics::new("stentor-worker"),
                frame: RgbImage::new(layout.width, layout.height),
                violations: 0,
            },
            watchdog,
            poll_interval,
            stats: WorkerStats::default(),
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        self.pipeline.state.phase()
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Illegal phase transitions attempted so far. Always zero unless the
    /// task path is broken.
    pub fn transition_errors(&self) -> u64 {
        self.pipeline.violations
    }

    /// Leave `Starting` once the IPC resources are attached. Idempotent.
    pub fn start(&mut self) {
        if self.phase() == WorkerPhase::Starting {
            self.pipeline.enter(WorkerPhase::Running);
        }
    }

    pub fn run(mut self) -> WorkerExit {
        let layout = *self.ipc.frames.layout();
        tracing::info!(
            width = layout.width,
            height = layout.height,
            capacity = layout.capacity,
            parent = %self.watchdog.parent(),
            "Tracking worker starting"
        );

        // Tasks queued before we got here belong to the live main process.
        self.start();
        let reason = self.task_loop();
        self.pipeline.enter(WorkerPhase::Stopping);

        let leftover = self.drain_pending_tasks();
        self.pipeline.enter(WorkerPhase::Stopped);
        tracing::info!(
            reason = ?reason,
            published = self.stats.published,
            torn = self.stats.torn,
            failed = self.stats.failed,
            dropped = self.stats.dropped,
            leftover,
            violations = self.pipeline.violations,
            "Tracking worker stopped"
        );
        WorkerExit {
            reason,
            stats: self.stats,
        }
    }

    fn task_loop(&mut self) -> StopReason {
        loop {
            if self.ipc.control.stop_requested() {
                return StopReason::ControlStop;
            }
            if !self.watchdog.parent_alive() {
                tracing::warn!(parent = %self.watchdog.parent(), "Parent process is gone");
                return StopReason::ParentGone;
            }

            match self.ipc.tasks.recv_timeout(self.poll_interval) {
                Ok(Some(TaskMessage::Frame(task))) => {
                    let outcome = self.handle_task(&task);
                    self.stats.record(outcome);
                    if self.stats.handled().is_multiple_of(100) {
                        tracing::debug!(
                            handled = self.stats.handled(),
                            torn = self.stats.torn,
                            tracks = self.pipeline.tracker.tracks().len(),
                            "Worker progress"
                        );
                    }
                }
                Ok(Some(TaskMessage::Shutdown)) => return StopReason::Shutdown,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to receive task");
                    thread::sleep(self.poll_interval);
                }
            }
        }
    }

    /// Once stopping, discard whatever is still queued and return each
    /// task's permit so the main process can reuse its slots.
    fn drain_pending_tasks(&mut self) -> usize {
        let mut drained = 0;
        loop {
            match self.ipc.tasks.try_recv() {
                Ok(Some(TaskMessage::Frame(task))) => {
                    tracing::trace!(frame_index = task.frame_index, "Abandoning queued task");
                    if let Err(e) = PermitGuard::adopt(&self.ipc.semaphore).release() {
                        tracing::error!(error = %e, "Failed to release slot permit");
                    }
                    drained += 1;
                }
                Ok(Some(TaskMessage::Shutdown)) => {}
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to drain task queue");
                    break;
                }
            }
        }
        self.stats.abandoned += drained as u64;
        drained
    }

    /// Process one task. The task's slot permit is released exactly once,
    /// whatever the outcome, including a panic unwinding out of here.
    pub fn handle_task(&mut self, task: &FrameTask) -> TaskOutcome {
        let permit = PermitGuard::adopt(&self.ipc.semaphore);
        // Same as `self.start()`, borrowing only `pipeline` while `permit` holds `ipc`.
        if self.pipeline.state.phase() == WorkerPhase::Starting {
            self.pipeline.enter(WorkerPhase::Running);
        }
        let outcome = self.pipeline.process(
            task,
            &self.ipc.frames,
            &mut self.ipc.masks,
            &self.ipc.results,
        );
        if let Err(e) = permit.release() {
            tracing::error!(error = %e, slot = task.slot_index, "Failed to release slot permit");
        }
        self.pipeline.enter(WorkerPhase::Running);
        outcome
    }
}

/// Log locally and forward to the main process, best effort.
fn report(results: &ResultSender, level: DiagnosticLevel, message: String) {
    match level {
        DiagnosticLevel::Error => tracing::error!("{message}"),
        DiagnosticLevel::Warning => tracing::warn!("{message}"),
        DiagnosticLevel::Info => tracing::info!("{message}"),
        DiagnosticLevel::Debug => tracing::debug!("{message}"),
    }
    match results.try_send(&WorkerMessage::diagnostic(level, message)) {
        Ok(true) => {}
        Ok(false) => tracing::debug!("Result queue full, diagnostic dropped"),
        Err(e) => tracing::warn!(error = %e, "Failed to send diagnostic"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Best-effort notice to the main process that the worker could not start.
pub fn report_fatal(names: &IpcNames, reason: &str) {
    match ResultSender::open(&names.result_queue) {
        Ok(results) => {
            let message = WorkerMessage::Fatal {
                reason: reason.to_string(),
            };
            if let Err(e) = results.try_send(&message) {
                tracing::warn!(error = %e, "Failed to report fatal error");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Result queue unavailable for fatal report"),
    }
}
