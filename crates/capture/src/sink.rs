use crate::dispatcher::LatestMask;
use compositor::Compositor;
use image::RgbImage;
use std::sync::Arc;

/// Live consumer of every captured frame, tracked or not.
pub trait FrameSink: Send + Sync {
    /// Must not block the producer.
    fn submit(&self, frame: RgbImage, frame_index: u64);
}

/// Feeds the compositor, pairing each frame with the newest tracking mask.
pub struct PreviewSink {
    compositor: Compositor,
    masks: Arc<LatestMask>,
}

impl PreviewSink {
    pub fn new(compositor: Compositor, masks: Arc<LatestMask>) -> Self {
        Self { compositor, masks }
    }

    pub fn into_compositor(self) -> Compositor {
        self.compositor
    }
}

impl FrameSink for PreviewSink {
    fn submit(&self, frame: RgbImage, frame_index: u64) {
        let mask = self
            .masks
            .latest()
            .filter(|m| m.mask.dimensions() == frame.dimensions())
            .map(|m| m.mask);
        self.compositor.submit(frame, mask, frame_index);
    }
}
