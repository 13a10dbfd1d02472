use image::{GrayImage, Rgb, RgbImage};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposeOptions {
    /// Colour painted over mask foreground, RGB.
    pub tint: [u8; 3],
    /// Weight of the tint, 0.0 (invisible) to 1.0 (opaque).
    pub alpha: f32,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            tint: [255, 0, 255],
            alpha: 0.4,
        }
    }
}

/// Blend `mask` foreground over a copy of `frame`.
///
/// A mask whose geometry differs from the frame is ignored.
pub fn compose(frame: &RgbImage, mask: Option<&GrayImage>, options: &ComposeOptions) -> RgbImage {
    let mut out = frame.clone();
    let Some(mask) = mask else {
        return out;
    };
    if mask.dimensions() != frame.dimensions() {
        tracing::debug!(
            frame = ?frame.dimensions(),
            mask = ?mask.dimensions(),
            "Mask geometry mismatch, showing frame only"
        );
        return out;
    }

    let alpha = options.alpha.clamp(0.0, 1.0);
    if alpha == 0.0 {
        return out;
    }
    let tint = options.tint.map(|c| c as f32 * alpha);
    let keep = 1.0 - alpha;

    for (pixel, m) in out.pixels_mut().zip(mask.as_raw()) {
        if *m == 0 {
            continue;
        }
        let Rgb(channels) = pixel;
        for (c, t) in channels.iter_mut().zip(tint) {
            *c = (*c as f32 * keep + t).round().min(255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn frame() -> RgbImage {
        RgbImage::from_pixel(8, 4, Rgb([100, 100, 100]))
    }

    #[test]
    fn test_without_mask_copies_frame() {
        let f = frame();
        assert_eq!(compose(&f, None, &ComposeOptions::default()), f);
    }

    #[test]
    fn test_blends_only_foreground() {
        let f = frame();
        let mut mask = GrayImage::new(8, 4);
        mask.put_pixel(2, 1, Luma([255]));
        let options = ComposeOptions {
            tint: [200, 0, 0],
            alpha: 0.5,
        };
        let out = compose(&f, Some(&mask), &options);
        assert_eq!(out.get_pixel(2, 1), &Rgb([150, 50, 50]));
        assert_eq!(out.get_pixel(0, 0), &Rgb([100, 100, 100]));
    }

    #[test]
    fn test_opaque_tint_replaces_pixel() {
        let f = frame();
        let mask = GrayImage::from_pixel(8, 4, Luma([1]));
        let options = ComposeOptions {
            tint: [1, 2, 3],
            alpha: 1.0,
        };
        let out = compose(&f, Some(&mask), &options);
        assert!(out.pixels().all(|p| *p == Rgb([1, 2, 3])));
    }

    #[test]
    fn test_mismatched_mask_is_ignored() {
        let f = frame();
        let mask = GrayImage::from_pixel(4, 4, Luma([255]));
        assert_eq!(compose(&f, Some(&mask), &ComposeOptions::default()), f);
    }
}
