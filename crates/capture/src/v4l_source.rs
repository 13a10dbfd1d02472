use crate::decoder::{FrameDecoder, MjpegDecoder, YuyvDecoder};
use crate::source::CaptureSource;
use anyhow::{Context, Result, anyhow};
use common::retry::retry_with_backoff;
use image::RgbImage;
use v4l::{
    Device, FourCC,
    buffer::Type,
    io::{mmap::Stream, traits::CaptureStream},
    video::Capture,
};

const BUFFER_COUNT: u32 = 4;

const FOURCC_YUYV: FourCC = FourCC { repr: *b"YUYV" };
const FOURCC_MJPG: FourCC = FourCC { repr: *b"MJPG" };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuyv,
    Mjpeg,
}

fn find_usable_camera() -> Option<u32> {
    v4l::context::enum_devices()
        .into_iter()
        .find(|dev| {
            Device::with_path(dev.path())
                .and_then(|d| d.query_caps())
                .map(|caps| {
                    caps.capabilities
                        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                })
                .unwrap_or(false)
        })
        .map(|dev| dev.index() as u32)
}

fn open_device(index: u32) -> Result<Device> {
    if let Ok(dev) = Device::new(index as usize)
        && dev.query_caps().is_ok()
    {
        return Ok(dev);
    }
    tracing::debug!(index, "Camera busy or missing, scanning alternatives");
    let best = find_usable_camera().ok_or_else(|| anyhow!("No usable video devices found"))?;
    Device::new(best as usize).context("Failed to open fallback camera device")
}

/// Prefer YUYV (cheap to decode), fall back to MJPEG.
fn select_format(device: &Device) -> Result<PixelFormat> {
    let formats = device.enum_formats()?;
    if formats.iter().any(|f| f.fourcc == FOURCC_YUYV) {
        return Ok(PixelFormat::Yuyv);
    }
    if formats.iter().any(|f| f.fourcc == FOURCC_MJPG) {
        return Ok(PixelFormat::Mjpeg);
    }
    Err(anyhow!(
        "Camera supports neither YUYV nor MJPEG - available: {:?}",
        formats.iter().map(|f| f.fourcc).collect::<Vec<_>>()
    ))
}

struct Opened {
    stream: Stream<'static>,
    decoder: Box<dyn FrameDecoder>,
    width: u32,
    height: u32,
    fps: f64,
    // Keeps the device handle open for the stream's lifetime.
    _device: Device,
}

/// V4L2 camera.
pub struct V4lSource {
    device_id: u32,
    opened: Option<Opened>,
}

impl V4lSource {
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            opened: None,
        }
    }

    fn try_open(&self) -> Result<Opened> {
        let device = retry_with_backoff(|| open_device(self.device_id), 10, 200, "Camera init")?;
        let caps = device.query_caps()?;
        tracing::info!(card = %caps.card, driver = %caps.driver, "Camera opened");

        let pixel_format = select_format(&device)?;
        let mut format = device.format()?;
        format.fourcc = match pixel_format {
            PixelFormat::Yuyv => FOURCC_YUYV,
            PixelFormat::Mjpeg => FOURCC_MJPG,
        };
        let format = device.set_format(&format)?;
        let decoder: Box<dyn FrameDecoder> = match pixel_format {
            PixelFormat::Yuyv => Box::new(YuyvDecoder),
            PixelFormat::Mjpeg => Box::new(MjpegDecoder::new()?),
        };

        let params = device.params()?;
        let fps = params.interval.denominator as f64 / params.interval.numerator.max(1) as f64;
        tracing::info!(
            width = format.width,
            height = format.height,
            format = ?pixel_format,
            fps,
            "Capture format"
        );

        let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .context("Failed to create capture stream")?;
        Ok(Opened {
            stream,
            decoder,
            width: format.width,
            height: format.height,
            fps,
            _device: device,
        })
    }
}

impl CaptureSource for V4lSource {
    fn open(&mut self) -> bool {
        match self.try_open() {
            Ok(opened) => {
                self.opened = Some(opened);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, device = self.device_id, "Failed to open camera");
                false
            }
        }
    }

    fn read(&mut self) -> Result<RgbImage> {
        let opened = self
            .opened
            .as_mut()
            .ok_or_else(|| anyhow!("camera is not open"))?;
        let (raw, _meta) = opened.stream.next()?;
        opened.decoder.decode(raw, opened.width, opened.height)
    }

    fn size(&self) -> Option<(u32, u32)> {
        self.opened.as_ref().map(|o| (o.width, o.height))
    }

    fn fps(&self) -> Option<f64> {
        self.opened.as_ref().map(|o| o.fps)
    }
}
