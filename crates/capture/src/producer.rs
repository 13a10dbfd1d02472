use crate::events::{PipelineObserver, ShmReady};
use crate::pacing::FramePacer;
use crate::sink::FrameSink;
use crate::source::CaptureSource;
use anyhow::Context;
use bridge::{
    DiagnosticLevel, FrameTask, IpcNames, PermitGuard, RingLayout, SlotRing, SlotSemaphore,
    TaskMessage, TaskSender, TraceContext, monotonic_seconds,
};
use opentelemetry::{global, metrics::Counter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

pub struct ProducerConfig {
    pub names: IpcNames,
    pub capacity: u32,
    /// Overrides the source's own rate when set.
    pub fps: Option<f64>,
}

/// Result of one producer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Written to the ring and handed to the worker.
    Submitted { frame_index: u64, slot: u32 },
    /// Every slot is in flight; the frame only goes to the preview.
    Busy { frame_index: u64 },
    /// The task queue was full; the permit was given back.
    QueueFull { frame_index: u64 },
    /// Transient capture failure, retried next tick.
    ReadFailed,
    /// The source has nothing more to give.
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub captured: u64,
    pub submitted: u64,
    pub busy: u64,
    pub queue_full: u64,
    pub read_errors: u64,
}

struct ProducerMetrics {
    captured: Counter<u64>,
    skipped: Counter<u64>,
    read_errors: Counter<u64>,
}

fn init_metrics(meter_name: &'static str) -> ProducerMetrics {
    let meter = global::meter(meter_name);
    ProducerMetrics {
        captured: meter
            .u64_counter("capture_frames_total")
            .with_description("Total frames captured")
            .build(),
        skipped: meter
            .u64_counter("capture_frames_untracked_total")
            .with_description("Frames shown but not tracked (no free slot or queue full)")
            .build(),
        read_errors: meter
            .u64_counter("capture_read_errors_total")
            .with_description("Failed capture reads")
            .build(),
    }
}

struct Rings {
    frames: SlotRing,
    // Held so the mask ring lives (and is unlinked) with the producer.
    _masks: SlotRing,
}

/// Reads frames from a source and offers each one to the tracking worker
/// through the frame ring without ever waiting on it.
pub struct FrameProducer<S: CaptureSource> {
    source: S,
    config: ProducerConfig,
    semaphore: Arc<SlotSemaphore>,
    tasks: Arc<TaskSender>,
    observer: Arc<dyn PipelineObserver>,
    sink: Option<Arc<dyn FrameSink>>,
    rings: Option<Rings>,
    frame_index: u64,
    stats: ProducerStats,
    metrics: ProducerMetrics,
}

impl<S: CaptureSource> FrameProducer<S> {
    pub fn new(
        source: S,
        config: ProducerConfig,
        semaphore: Arc<SlotSemaphore>,
        tasks: Arc<TaskSender>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            source,
            config,
            semaphore,
            tasks,
            observer,
            sink: None,
            rings: None,
            frame_index: 0,
            stats: ProducerStats::default(),
            metrics: init_metrics("stentor-capture"),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn FrameSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    /// Frame geometry, once the first frame arrived.
    pub fn geometry(&self) -> Option<(u32, u32)> {
        self.rings
            .as_ref()
            .map(|r| (r.frames.layout().width, r.frames.layout().height))
    }

    fn create_rings(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        let capacity = self.config.capacity;
        let names = &self.config.names;
        let frame_layout = RingLayout::frames(capacity, width, height);
        let frames = SlotRing::create(&names.frame_ring, frame_layout)
            .with_context(|| format!("Failed to create frame ring {}", names.frame_ring.display()))?;
        let masks = SlotRing::create(&names.mask_ring, RingLayout::masks(capacity, width, height))
            .with_context(|| format!("Failed to create mask ring {}", names.mask_ring.display()))?;

        let ready = ShmReady {
            frame_ring: names.frame_ring.clone(),
            frame_shape: (height, width, frame_layout.channels),
            mask_ring: names.mask_ring.clone(),
            mask_shape: (height, width),
            generation_offset: frame_layout.generations_offset(),
            capacity,
            semaphore: names.semaphore.clone(),
        };
        self.rings = Some(Rings {
            frames,
            _masks: masks,
        });
        self.observer.on_shm_ready(&ready);
        Ok(())
    }

    /// Capture one frame and offer it to the worker. Errors are fatal for
    /// the producer (ring setup); everything per frame is a `Tick`.
    pub fn tick(&mut self) -> anyhow::Result<Tick> {
        if self.source.is_finished() {
            return Ok(Tick::Finished);
        }
        let frame = match self.source.read() {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.read_errors += 1;
                self.metrics.read_errors.add(1, &[]);
                tracing::warn!(error = %e, frame_index = self.frame_index + 1, "Capture read failed");
                return Ok(Tick::ReadFailed);
            }
        };
        let timestamp = monotonic_seconds();

        match self.geometry() {
            None => {
                if frame.width() == 0 || frame.height() == 0 {
                    self.observer
                        .on_log(DiagnosticLevel::Error, "first frame is empty, capture stopped");
                    anyhow::bail!("first frame is empty");
                }
                self.create_rings(frame.width(), frame.height())?;
            }
            Some(geometry) if geometry != frame.dimensions() => {
                self.stats.read_errors += 1;
                tracing::warn!(
                    expected = ?geometry,
                    actual = ?frame.dimensions(),
                    "Frame geometry changed, dropping frame"
                );
                return Ok(Tick::ReadFailed);
            }
            Some(_) => {}
        }

        self.frame_index += 1;
        let frame_index = self.frame_index;
        self.stats.captured += 1;
        self.metrics.captured.add(1, &[]);

        let span = tracing::info_span!("capture_frame", frame_index);
        let _enter = span.enter();

        let tick = self.offer(&frame, frame_index, timestamp);
        if !matches!(tick, Tick::Submitted { .. }) {
            self.metrics.skipped.add(1, &[]);
        }

        if let Some(sink) = &self.sink {
            sink.submit(frame, frame_index);
        }
        Ok(tick)
    }

    fn offer(&mut self, frame: &image::RgbImage, frame_index: u64, timestamp: f64) -> Tick {
        let Some(rings) = self.rings.as_mut() else {
            return Tick::ReadFailed;
        };
        let permit = match PermitGuard::try_acquire(&self.semaphore) {
            Ok(Some(permit)) => permit,
            Ok(None) => {
                self.stats.busy += 1;
                return Tick::Busy { frame_index };
            }
            Err(e) => {
                tracing::warn!(error = %e, "Slot semaphore unavailable");
                self.stats.busy += 1;
                return Tick::Busy { frame_index };
            }
        };

        let slot = rings.frames.slot_for(frame_index);
        {
            let _span = common::span_debug!("ring_write");
            if let Err(e) = rings.frames.write(slot, frame.as_raw(), frame_index) {
                tracing::warn!(error = %e, slot, "Failed to write frame slot");
                self.stats.busy += 1;
                return Tick::Busy { frame_index };
            }
        }

        let task = FrameTask {
            frame_index,
            timestamp,
            slot_index: slot as u32,
            trace: TraceContext::from_current(),
        };
        match self.tasks.try_send(&TaskMessage::Frame(task.clone())) {
            Ok(true) => {
                // The worker releases this permit once it is done with the slot.
                permit.forget();
                self.stats.submitted += 1;
                self.observer.on_cv_task(&task);
                Tick::Submitted {
                    frame_index,
                    slot: slot as u32,
                }
            }
            Ok(false) => {
                self.stats.queue_full += 1;
                tracing::debug!(frame_index, "Task queue full, frame not tracked");
                Tick::QueueFull { frame_index }
            }
            Err(e) => {
                self.stats.queue_full += 1;
                tracing::warn!(error = %e, frame_index, "Failed to send task");
                Tick::QueueFull { frame_index }
            }
        }
    }

    /// Tick at the configured cadence until `stop` is set, the source ends
    /// or setup fails.
    pub fn run(mut self, stop: &AtomicBool) -> ProducerStats {
        if !self.source.open() {
            self.observer
                .on_log(DiagnosticLevel::Error, "capture source failed to open");
            return self.stats;
        }
        let fps = self.config.fps.or(self.source.fps()).unwrap_or(30.0);
        let mut pacer = FramePacer::new(fps);
        tracing::info!(fps, size = ?self.source.size(), "Frame producer started");

        while !stop.load(Ordering::Relaxed) {
            match self.tick() {
                Ok(Tick::Finished) => {
                    tracing::info!("Capture source finished");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Frame producer stopped");
                    self.observer
                        .on_log(DiagnosticLevel::Error, &format!("frame producer stopped: {e:#}"));
                    break;
                }
            }
            if self.stats.captured > 0 && self.stats.captured.is_multiple_of(30) {
                tracing::debug!(
                    captured = self.stats.captured,
                    submitted = self.stats.submitted,
                    busy = self.stats.busy,
                    queue_full = self.stats.queue_full,
                    read_errors = self.stats.read_errors,
                    "Producer status"
                );
            }
            pacer.wait();
        }

        tracing::info!(
            captured = self.stats.captured,
            submitted = self.stats.submitted,
            busy = self.stats.busy,
            "Frame producer stopped"
        );
        self.stats
    }
}

impl<S: CaptureSource + 'static> FrameProducer<S> {
    pub fn spawn(self) -> std::io::Result<FrameProducerHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let (done_tx, done_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("frame-producer".into())
            .spawn(move || {
                let stats = self.run(&flag);
                let _ = done_tx.send(stats);
            })?;
        Ok(FrameProducerHandle {
            stop,
            done: done_rx,
            handle: Some(handle),
        })
    }
}

pub struct FrameProducerHandle {
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<ProducerStats>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FrameProducerHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Ask the producer to stop and wait up to `timeout`. `false` when the
    /// thread is still running (it is left detached).
    pub fn stop(mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Relaxed);
        match self.done.recv_timeout(timeout) {
            Ok(_) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        tracing::error!("Frame producer panicked");
                    }
                }
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::warn!(timeout = ?timeout, "Frame producer did not stop in time");
                false
            }
        }
    }
}
