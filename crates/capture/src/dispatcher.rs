use crate::events::{FrameLogger, PipelineObserver};
use bridge::{
    DiagnosticLevel, ReadOutcome, ResultMessage, ResultReceiver, RingKind, SlotRing, WorkerMessage,
};
use image::GrayImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A validated tracking mask and the frame it belongs to.
#[derive(Debug, Clone)]
pub struct MaskFrame {
    pub frame_index: u64,
    pub mask: Arc<GrayImage>,
}

/// Newest validated mask, shared with the preview.
#[derive(Debug, Default)]
pub struct LatestMask {
    inner: Mutex<Option<MaskFrame>>,
}

impl LatestMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `mask` unless a newer frame's mask is already held.
    pub fn publish(&self, frame_index: u64, mask: GrayImage) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.as_ref().is_some_and(|m| m.frame_index >= frame_index) {
            return false;
        }
        *inner = Some(MaskFrame {
            frame_index,
            mask: Arc::new(mask),
        });
        true
    }

    pub fn latest(&self) -> Option<MaskFrame> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub results: u64,
    pub masks: u64,
    pub torn_masks: u64,
    pub diagnostics: u64,
    pub fatal: u64,
}

/// What one dispatch step delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Results { frame_index: u64, tracks: usize, mask: bool },
    Diagnostic(DiagnosticLevel),
    Fatal(String),
}

/// Drains the result queue on its own thread and fans results out.
pub struct ResultDispatcher {
    results: ResultReceiver,
    mask_ring_path: PathBuf,
    masks: Option<SlotRing>,
    latest: Arc<LatestMask>,
    observer: Arc<dyn PipelineObserver>,
    logger: Arc<dyn FrameLogger>,
    poll_interval: Duration,
    buf: Vec<u8>,
    stats: DispatchStats,
}

impl ResultDispatcher {
    pub fn new(
        results: ResultReceiver,
        mask_ring_path: PathBuf,
        latest: Arc<LatestMask>,
        observer: Arc<dyn PipelineObserver>,
        logger: Arc<dyn FrameLogger>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            results,
            mask_ring_path,
            masks: None,
            latest,
            observer,
            logger,
            poll_interval,
            buf: Vec::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Wait up to `timeout` for one worker message and deliver it.
    pub fn dispatch_one(&mut self, timeout: Duration) -> anyhow::Result<Option<Dispatched>> {
        let Some(message) = self.results.recv_timeout(timeout)? else {
            return Ok(None);
        };
        let dispatched = match message {
            WorkerMessage::Detection(result) => self.deliver(result),
            WorkerMessage::Diagnostic { level, message } => {
                self.stats.diagnostics += 1;
                self.observer.on_log(level, &message);
                Dispatched::Diagnostic(level)
            }
            WorkerMessage::Fatal { reason } => {
                self.stats.fatal += 1;
                self.observer
                    .on_log(DiagnosticLevel::Error, &format!("tracking worker failed: {reason}"));
                Dispatched::Fatal(reason)
            }
        };
        Ok(Some(dispatched))
    }

    fn deliver(&mut self, result: ResultMessage) -> Dispatched {
        self.stats.results += 1;
        let mask = match result.mask_slot {
            Some(slot) => self.load_mask(slot as usize, result.frame_index),
            None => false,
        };
        self.logger
            .log_frame(&result.results, result.frame_index, result.timestamp);
        self.observer.on_results_ready(&result);
        Dispatched::Results {
            frame_index: result.frame_index,
            tracks: result.results.len(),
            mask,
        }
    }

    fn load_mask(&mut self, slot: usize, frame_index: u64) -> bool {
        if self.masks.is_none() {
            match SlotRing::attach(&self.mask_ring_path, RingKind::Mask) {
                Ok(ring) => {
                    self.buf = vec![0; ring.slot_size()];
                    self.masks = Some(ring);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Mask ring unavailable");
                    return false;
                }
            }
        }
        let Some(ring) = self.masks.as_ref() else {
            return false;
        };

        match ring.read_validated(slot, frame_index, &mut self.buf) {
            Ok(ReadOutcome::Valid) => {
                let layout = ring.layout();
                match GrayImage::from_raw(layout.width, layout.height, self.buf.clone()) {
                    Some(mask) => {
                        self.stats.masks += 1;
                        self.latest.publish(frame_index, mask);
                        true
                    }
                    None => false,
                }
            }
            Ok(ReadOutcome::Torn { after, .. }) => {
                // The worker already reused the slot for a later frame.
                self.stats.torn_masks += 1;
                tracing::debug!(frame_index, slot, now = after, "Mask overwritten before read");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, slot, "Failed to read mask");
                false
            }
        }
    }

    pub fn run(mut self, stop: &AtomicBool) -> DispatchStats {
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.dispatch_one(self.poll_interval) {
                tracing::warn!(error = %e, "Failed to receive worker message");
                thread::sleep(self.poll_interval);
            }
        }
        // Deliver whatever the worker sent before it stopped.
        while let Ok(Some(_)) = self.dispatch_one(Duration::ZERO) {}
        tracing::debug!(
            results = self.stats.results,
            masks = self.stats.masks,
            diagnostics = self.stats.diagnostics,
            "Result dispatcher stopped"
        );
        self.stats
    }

    pub fn spawn(self) -> std::io::Result<DispatcherHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("result-dispatcher".into())
            .spawn(move || self.run(&flag))?;
        Ok(DispatcherHandle { stop, handle })
    }
}

pub struct DispatcherHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<DispatchStats>,
}

impl DispatcherHandle {
    pub fn stop(self) -> DispatchStats {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().unwrap_or_else(|_| {
            tracing::error!("Result dispatcher panicked");
            DispatchStats::default()
        })
    }
}
