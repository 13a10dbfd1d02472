//! Scripted frames for running the pipeline without a camera.
//!
//! Organisms are dark green ellipses on a bright, slightly noisy background,
//! which is how attached ciliates look to the segmenter under transmitted
//! light. Each organism follows a schedule mapping frame numbers to an
//! elongation, so contraction events can be reproduced frame-exactly.

use crate::source::CaptureSource;
use image::{Rgb, RgbImage};

const BACKGROUND: [u8; 3] = [250, 250, 250];
const BODY: [u8; 3] = [35, 150, 45];

/// One scripted organism.
#[derive(Debug, Clone, PartialEq)]
pub struct Organism {
    pub center: (f64, f64),
    /// Radius of the equal-area disc; elongation stretches around it.
    pub radius: f64,
    /// Orientation of the long axis in radians.
    pub angle: f64,
    /// `(from_frame, aspect)` keyframes, sorted by frame. Aspect 1.0 is a
    /// round body, larger values stretch it. The last keyframe at or before
    /// a frame applies.
    pub schedule: Vec<(u64, f64)>,
}

impl Organism {
    pub fn round(center: (f64, f64), radius: f64) -> Self {
        Self {
            center,
            radius,
            angle: 0.0,
            schedule: vec![(0, 1.0)],
        }
    }

    pub fn with_schedule(mut self, schedule: Vec<(u64, f64)>) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    pub fn aspect_at(&self, frame: u64) -> f64 {
        self.schedule
            .iter()
            .take_while(|(from, _)| *from <= frame)
            .last()
            .map_or(1.0, |(_, aspect)| aspect.max(1.0))
    }

    fn paint(&self, image: &mut RgbImage, frame: u64) {
        let aspect = self.aspect_at(frame);
        let a = self.radius * aspect.sqrt();
        let b = self.radius / aspect.sqrt();
        let (sin, cos) = self.angle.sin_cos();
        let (cx, cy) = self.center;

        let reach = a.ceil() as i64 + 1;
        let (w, h) = (image.width() as i64, image.height() as i64);
        let x0 = (cx as i64 - reach).max(0);
        let x1 = (cx as i64 + reach).min(w - 1);
        let y0 = (cy as i64 - reach).max(0);
        let y1 = (cy as i64 + reach).min(h - 1);

        for y in y0..=y1 {
            for x in x0..=x1 {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                let u = (dx * cos + dy * sin) / a;
                let v = (-dx * sin + dy * cos) / b;
                if u * u + v * v <= 1.0 {
                    image.put_pixel(x as u32, y as u32, Rgb(BODY));
                }
            }
        }
    }
}

pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: f64,
    organisms: Vec<Organism>,
    noise: u8,
    rng: fastrand::Rng,
    frame: u64,
    max_frames: Option<u64>,
    opened: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, organisms: Vec<Organism>) -> Self {
        Self {
            width,
            height,
            fps: 30.0,
            organisms,
            noise: 0,
            rng: fastrand::Rng::with_seed(0x5EED),
            frame: 0,
            max_frames: None,
            opened: false,
        }
    }

    /// Three organisms: one resting round, one extended, one cycling through
    /// extension and fast contraction every four seconds at 30 fps.
    pub fn demo(width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        let r = (w.min(h) / 24.0).max(8.0);
        let resting = Organism::round((w * 0.25, h * 0.5), r);
        let extended = Organism::round((w * 0.5, h * 0.3), r)
            .with_angle(0.6)
            .with_schedule(vec![(0, 4.0)]);
        let cycle: Vec<(u64, f64)> = (0..1000u64)
            .flat_map(|i| [(i * 120, 3.5), (i * 120 + 90, 1.0)])
            .collect();
        let contracting = Organism::round((w * 0.7, h * 0.65), r)
            .with_angle(-0.4)
            .with_schedule(cycle);
        Self::new(width, height, vec![resting, extended, contracting]).with_noise(6)
    }

    /// Per-pixel background noise amplitude.
    pub fn with_noise(mut self, amplitude: u8) -> Self {
        self.noise = amplitude;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame
    }

    pub fn render(&mut self, frame: u64) -> RgbImage {
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb(BACKGROUND));
        if self.noise > 0 {
            let amplitude = self.noise as i16;
            for pixel in image.pixels_mut() {
                let n = self.rng.i16(-amplitude..=amplitude);
                for c in pixel.0.iter_mut() {
                    *c = (*c as i16 + n).clamp(0, 255) as u8;
                }
            }
        }
        for organism in &self.organisms {
            organism.paint(&mut image, frame);
        }
        image
    }
}

impl CaptureSource for SyntheticSource {
    fn open(&mut self) -> bool {
        self.opened = self.width > 0 && self.height > 0;
        if self.opened {
            tracing::info!(
                width = self.width,
                height = self.height,
                organisms = self.organisms.len(),
                "Synthetic source opened"
            );
        }
        self.opened
    }

    fn read(&mut self) -> anyhow::Result<RgbImage> {
        if !self.opened {
            anyhow::bail!("synthetic source is not open");
        }
        if self.is_finished() {
            anyhow::bail!("synthetic source exhausted after {} frames", self.frame);
        }
        let image = self.render(self.frame);
        self.frame += 1;
        Ok(image)
    }

    fn size(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn fps(&self) -> Option<f64> {
        Some(self.fps)
    }

    fn is_finished(&self) -> bool {
        self.max_frames.is_some_and(|max| self.frame >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_lookup() {
        let organism =
            Organism::round((10.0, 10.0), 5.0).with_schedule(vec![(0, 1.0), (10, 3.0), (20, 1.0)]);
        assert_eq!(organism.aspect_at(0), 1.0);
        assert_eq!(organism.aspect_at(9), 1.0);
        assert_eq!(organism.aspect_at(10), 3.0);
        assert_eq!(organism.aspect_at(25), 1.0);
    }

    #[test]
    fn test_render_paints_body_colour() {
        let mut source = SyntheticSource::new(64, 48, vec![Organism::round((32.0, 24.0), 6.0)]);
        let image = source.render(0);
        assert_eq!(image.get_pixel(32, 24), &Rgb(BODY));
        assert_eq!(image.get_pixel(0, 0), &Rgb(BACKGROUND));
    }

    #[test]
    fn test_elongation_preserves_orientation() {
        let organism = Organism::round((32.0, 24.0), 6.0).with_schedule(vec![(0, 4.0)]);
        let mut source = SyntheticSource::new(64, 48, vec![organism]);
        let image = source.render(0);
        // Long axis along x: a = 12, b = 3.
        assert_eq!(image.get_pixel(43, 24), &Rgb(BODY));
        assert_eq!(image.get_pixel(32, 29), &Rgb(BACKGROUND));
    }

    #[test]
    fn test_noise_is_deterministic_per_seed() {
        let mut a = SyntheticSource::new(16, 16, vec![]).with_noise(5).with_seed(7);
        let mut b = SyntheticSource::new(16, 16, vec![]).with_noise(5).with_seed(7);
        assert_eq!(a.render(0), b.render(0));
    }

    #[test]
    fn test_frame_budget() {
        let mut source = SyntheticSource::new(8, 8, vec![]).with_max_frames(Some(2));
        assert!(source.read().is_err());
        assert!(source.open());
        assert!(source.read().is_ok());
        assert!(source.read().is_ok());
        assert!(source.is_finished());
        assert!(source.read().is_err());
    }
}
