use crate::semaphore::SemaphoreError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Invalid ring layout: {0}")]
    InvalidLayout(String),

    #[error("Slot {slot} out of range for ring of capacity {capacity}")]
    SlotOutOfRange { slot: usize, capacity: usize },

    #[error("Message of {len} bytes exceeds queue message size {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Message codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Message queue error: {0}")]
    Queue(#[from] nix::errno::Errno),

    #[error("Semaphore error: {0}")]
    Semaphore(#[from] SemaphoreError),
}
