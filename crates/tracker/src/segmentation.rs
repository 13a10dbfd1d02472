//! Foreground segmentation: inverted red channel, Gaussian adaptive
//! threshold, then a morphological opening.
//!
//! Green organisms on a white background are dark in red; inverting makes
//! them bright on a dark field.

use crate::config::normalize_block_size;
use image::{GrayImage, RgbImage};

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Erode/dilate passes of the opening.
pub const OPEN_ITERATIONS: usize = 2;

/// Fixed kernels used for small apertures, matching common imaging
/// libraries when no sigma is given.
const SMALL_KERNELS: [&[f32]; 4] = [
    &[1.0],
    &[0.25, 0.5, 0.25],
    &[0.0625, 0.25, 0.375, 0.25, 0.0625],
    &[
        0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125,
    ],
];

#[derive(Debug, Clone)]
pub struct Segmenter {
    block_size: u32,
    c: i32,
    kernel: Vec<f32>,
}

impl Segmenter {
    pub fn new(block_size: u32, c: i32) -> Self {
        let block_size = normalize_block_size(block_size);
        Self {
            block_size,
            c,
            kernel: gaussian_kernel(block_size as usize),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Binary mask (0 / 255) of the frame's foreground after opening.
    pub fn segment(&self, frame: &RgbImage) -> GrayImage {
        let roi = inverted_red(frame);
        let mask = self.threshold(&roi);
        open_cross(&mask, OPEN_ITERATIONS)
    }

    /// `pixel > local_mean - c` becomes foreground, where the local mean is
    /// Gaussian-weighted over a `block_size` window with replicated borders.
    pub fn threshold(&self, roi: &GrayImage) -> GrayImage {
        let (width, height) = roi.dimensions();
        let mean = gaussian_blur(roi, &self.kernel);
        let src = roi.as_raw();
        let out: Vec<u8> = src
            .iter()
            .zip(mean.iter())
            .map(|(&p, &m)| {
                if (p as i32) > (m as i32) - self.c {
                    FOREGROUND
                } else {
                    BACKGROUND
                }
            })
            .collect();
        GrayImage::from_raw(width, height, out).unwrap_or_else(|| GrayImage::new(width, height))
    }
}

/// `255 - red` for every pixel.
pub fn inverted_red(frame: &RgbImage) -> GrayImage {
    let (width, height) = frame.dimensions();
    let data: Vec<u8> = frame.as_raw().chunks_exact(3).map(|px| 255 - px[0]).collect();
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Normalised 1-D Gaussian of odd length `ksize`.
pub fn gaussian_kernel(ksize: usize) -> Vec<f32> {
    if ksize % 2 == 1 && ksize <= 7 {
        return SMALL_KERNELS[ksize / 2].to_vec();
    }
    let sigma = 0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let scale = -0.5 / (sigma * sigma);
    let center = (ksize / 2) as f64;
    let raw: Vec<f64> = (0..ksize)
        .map(|i| {
            let x = i as f64 - center;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|v| (v / sum) as f32).collect()
}

#[inline]
fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Separable blur with replicated borders, rounded to 8 bits.
fn gaussian_blur(src: &GrayImage, kernel: &[f32]) -> Vec<u8> {
    let (width, height) = (src.width() as usize, src.height() as usize);
    let data = src.as_raw();
    let radius = (kernel.len() / 2) as isize;

    let mut horizontal = vec![0f32; width * height];
    for y in 0..height {
        let row = &data[y * width..(y + 1) * width];
        for x in 0..width {
            let mut acc = 0f32;
            for (k, w) in kernel.iter().enumerate() {
                let sx = clamp_index(x as isize + k as isize - radius, width);
                acc += w * row[sx] as f32;
            }
            horizontal[y * width + x] = acc;
        }
    }

    let mut out = vec![0u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0f32;
            for (k, w) in kernel.iter().enumerate() {
                let sy = clamp_index(y as isize + k as isize - radius, height);
                acc += w * horizontal[sy * width + x];
            }
            out[y * width + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// One pass with the 3x3 cross element. Pixels outside the frame do not
/// take part, so borders neither erode nor grow.
fn morph_pass(src: &[u8], width: usize, height: usize, dilate: bool) -> Vec<u8> {
    let mut out = vec![BACKGROUND; src.len()];
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            let mut neighbours = [src[i]; 5];
            if x > 0 {
                neighbours[1] = src[i - 1];
            }
            if x + 1 < width {
                neighbours[2] = src[i + 1];
            }
            if y > 0 {
                neighbours[3] = src[i - width];
            }
            if y + 1 < height {
                neighbours[4] = src[i + width];
            }
            out[i] = if dilate {
                *neighbours.iter().max().unwrap_or(&BACKGROUND)
            } else {
                *neighbours.iter().min().unwrap_or(&BACKGROUND)
            };
        }
    }
    out
}

pub fn erode_cross(mask: &GrayImage, iterations: usize) -> GrayImage {
    apply(mask, iterations, false)
}

pub fn dilate_cross(mask: &GrayImage, iterations: usize) -> GrayImage {
    apply(mask, iterations, true)
}

fn apply(mask: &GrayImage, iterations: usize, dilate: bool) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut data = mask.as_raw().clone();
    for _ in 0..iterations {
        data = morph_pass(&data, width as usize, height as usize, dilate);
    }
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Opening: `iterations` erosions followed by as many dilations.
pub fn open_cross(mask: &GrayImage, iterations: usize) -> GrayImage {
    dilate_cross(&erode_cross(mask, iterations), iterations)
}
