use crate::errors::BridgeError;
use crate::shm::SharedSegment;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Run = 0,
    Stop = 1,
}

impl ControlMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ControlMode::Run),
            1 => Some(ControlMode::Stop),
            _ => None,
        }
    }
}

/// One shared byte carrying the cooperative stop signal to the worker.
pub struct WorkerControl {
    segment: SharedSegment,
}

impl WorkerControl {
    /// Create the control segment in `Run` mode (main process side).
    pub fn create(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let control = Self {
            segment: SharedSegment::create(path, 1)?,
        };
        control.set_mode(ControlMode::Run);
        Ok(control)
    }

    /// Attach to an existing control segment (worker side).
    pub fn attach(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let segment = SharedSegment::attach(path)?;
        if segment.is_empty() {
            return Err(BridgeError::SizeMismatch {
                expected: 1,
                actual: 0,
            });
        }
        Ok(Self { segment })
    }

    #[inline]
    fn cell(&self) -> &AtomicU8 {
        // SAFETY: the segment holds at least one byte and outlives &self.
        unsafe { &*(self.segment.as_ptr() as *const AtomicU8) }
    }

    /// Unknown byte values read as `Stop`.
    #[inline]
    pub fn mode(&self) -> ControlMode {
        let value = self.cell().load(Ordering::Acquire);
        ControlMode::from_u8(value).unwrap_or(ControlMode::Stop)
    }

    #[inline]
    pub fn set_mode(&self, mode: ControlMode) {
        self.cell().store(mode as u8, Ordering::Release);
    }

    pub fn request_stop(&self) {
        self.set_mode(ControlMode::Stop);
    }

    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.mode() == ControlMode::Stop
    }
}
