use anyhow::{Result, anyhow};
use common::span;
use image::RgbImage;

/// Turns raw device buffers into RGB frames.
pub trait FrameDecoder: Send {
    fn decode(&mut self, raw: &[u8], width: u32, height: u32) -> Result<RgbImage>;
}

/// YUYV (YUV 4:2:2) decoder.
///
/// YUYV packs 2 pixels in 4 bytes: [Y0, U, Y1, V]
#[derive(Debug, Default, Clone, Copy)]
pub struct YuyvDecoder;

impl FrameDecoder for YuyvDecoder {
    fn decode(&mut self, raw: &[u8], width: u32, height: u32) -> Result<RgbImage> {
        let _s = span!("decode");

        let bytes_per_row = width as usize * 2;
        if height == 0 || width % 2 != 0 {
            return Err(anyhow!("invalid YUYV geometry {width}x{height}"));
        }
        let stride = raw.len() / height as usize;
        if stride < bytes_per_row {
            return Err(anyhow!(
                "YUYV buffer of {} bytes too small for {width}x{height}",
                raw.len()
            ));
        }

        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for row in raw.chunks(stride).take(height as usize) {
            for chunk in row[..bytes_per_row].chunks_exact(4) {
                let y0 = chunk[0] as i32;
                let u = chunk[1] as i32 - 128;
                let y1 = chunk[2] as i32;
                let v = chunk[3] as i32 - 128;

                // BT.601 fixed-point coefficients (8-bit fraction)
                let rv = (359 * v) >> 8;
                let gu = (88 * u + 183 * v) >> 8;
                let bu = (454 * u) >> 8;

                for y in [y0, y1] {
                    rgb.push((y + rv).clamp(0, 255) as u8);
                    rgb.push((y - gu).clamp(0, 255) as u8);
                    rgb.push((y + bu).clamp(0, 255) as u8);
                }
            }
        }

        RgbImage::from_raw(width, height, rgb).ok_or_else(|| anyhow!("short YUYV frame"))
    }
}

/// MJPEG decoder using turbojpeg (libjpeg-turbo)
#[cfg(feature = "v4l-camera")]
pub struct MjpegDecoder {
    decompressor: turbojpeg::Decompressor,
}

#[cfg(feature = "v4l-camera")]
impl MjpegDecoder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            decompressor: turbojpeg::Decompressor::new()?,
        })
    }
}

#[cfg(feature = "v4l-camera")]
impl FrameDecoder for MjpegDecoder {
    fn decode(&mut self, raw: &[u8], _width: u32, _height: u32) -> Result<RgbImage> {
        let _s = span!("decode");

        let header = self.decompressor.read_header(raw)?;
        let mut pixels = vec![0u8; header.width * header.height * 3];
        let output = turbojpeg::Image {
            pixels: pixels.as_mut_slice(),
            width: header.width,
            pitch: header.width * 3,
            height: header.height,
            format: turbojpeg::PixelFormat::RGB,
        };
        self.decompressor.decompress(raw, output)?;

        RgbImage::from_raw(header.width as u32, header.height as u32, pixels)
            .ok_or_else(|| anyhow!("short MJPEG frame"))
    }
}
