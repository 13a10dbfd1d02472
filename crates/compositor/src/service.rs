use crate::compose::{ComposeOptions, compose};
use crate::queue::{DEFAULT_CAPACITY, LatestQueue};
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageResult, RgbImage};
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RenderJob {
    pub frame: RgbImage,
    pub mask: Option<Arc<GrayImage>>,
    pub frame_index: u64,
}

#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub image: RgbImage,
    pub frame_index: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorStats {
    pub rendered: u64,
    /// Composed but dropped because the display side was full.
    pub dropped: u64,
}

/// Composes frames with their masks on a dedicated thread.
///
/// `submit` never blocks; under load only the newest frames are composed.
pub struct Compositor {
    queue: Arc<LatestQueue<RenderJob>>,
    handle: Option<JoinHandle<CompositorStats>>,
}

impl Compositor {
    pub fn spawn(output: SyncSender<RenderedFrame>, options: ComposeOptions) -> io::Result<Self> {
        let queue = Arc::new(LatestQueue::new(DEFAULT_CAPACITY));
        let jobs = Arc::clone(&queue);
        let handle = thread::Builder::new()
            .name("compositor".into())
            .spawn(move || render_loop(&jobs, &output, &options))?;
        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    /// Queue a frame for composition. Returns `true` if an older pending
    /// frame was evicted to make room.
    pub fn submit(
        &self,
        frame: RgbImage,
        mask: Option<Arc<GrayImage>>,
        frame_index: u64,
    ) -> bool {
        let evicted = self.queue.push(RenderJob {
            frame,
            mask,
            frame_index,
        });
        if evicted {
            tracing::trace!(frame_index, "Compositor behind, evicted oldest frame");
        }
        evicted
    }

    /// Close the queue and wait for the render thread.
    pub fn stop(mut self) -> CompositorStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> CompositorStats {
        self.queue.close();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                tracing::error!("Compositor thread panicked");
                CompositorStats::default()
            }
            None => CompositorStats::default(),
        }
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown();
        }
    }
}

fn render_loop(
    jobs: &LatestQueue<RenderJob>,
    output: &SyncSender<RenderedFrame>,
    options: &ComposeOptions,
) -> CompositorStats {
    tracing::debug!("Compositor started");
    let mut stats = CompositorStats::default();
    while !jobs.is_closed() || !jobs.is_empty() {
        let Some(job) = jobs.pop_timeout(POLL_INTERVAL) else {
            continue;
        };
        let image = {
            let _span = common::span_debug!("compose");
            compose(&job.frame, job.mask.as_deref(), options)
        };
        match output.try_send(RenderedFrame {
            image,
            frame_index: job.frame_index,
        }) {
            Ok(()) => stats.rendered += 1,
            Err(TrySendError::Full(_)) => stats.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("Display receiver gone, compositor exiting");
                break;
            }
        }
    }
    tracing::debug!(
        rendered = stats.rendered,
        dropped = stats.dropped,
        "Compositor stopped"
    );
    stats
}

/// Encode an RGB frame as JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)).encode_image(image)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_jpeg_produces_jpeg_markers() {
        let image = RgbImage::from_pixel(16, 16, image::Rgb([10, 200, 30]));
        let bytes = encode_jpeg(&image, 80).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }
}
