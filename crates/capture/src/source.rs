use image::RgbImage;

/// A camera-like frame source.
///
/// `read` blocks until the device has a frame. Errors are per frame: the
/// producer logs them and tries again on the next tick.
pub trait CaptureSource: Send {
    /// Prepare the device. `false` when it can not be used at all.
    fn open(&mut self) -> bool;

    fn read(&mut self) -> anyhow::Result<RgbImage>;

    /// Frame geometry, once known.
    fn size(&self) -> Option<(u32, u32)>;

    /// Native frame rate, if the device reports one.
    fn fps(&self) -> Option<f64>;

    /// A finite source (a recording, a frame budget) has nothing left.
    fn is_finished(&self) -> bool {
        false
    }
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
    fn open(&mut self) -> bool {
        (**self).open()
    }

    fn read(&mut self) -> anyhow::Result<RgbImage> {
        (**self).read()
    }

    fn size(&self) -> Option<(u32, u32)> {
        (**self).size()
    }

    fn fps(&self) -> Option<f64> {
        (**self).fps()
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }
}
