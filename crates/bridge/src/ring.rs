//! Fixed-capacity slot ring with per-slot generation tags.
//!
//! One writer per ring, any number of readers, no lock. Readers detect an
//! overwrite that raced with their copy and discard the data; they never
//! wait for the writer.

use crate::errors::BridgeError;
use crate::header::{EMPTY_GENERATION, RingHeader, RingKind, RingLayout, WRITING_GENERATION};
use crate::shm::SharedSegment;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering, fence};

/// Result of a generation-checked copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Valid,
    /// The slot was written during the copy or holds another frame.
    Torn { before: u64, after: u64, expected: u64 },
}

impl ReadOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ReadOutcome::Valid)
    }
}

pub struct SlotRing {
    segment: SharedSegment,
    layout: RingLayout,
}

impl SlotRing {
    /// Create a ring file, replacing any stale one, with every slot EMPTY.
    pub fn create(path: impl AsRef<Path>, layout: RingLayout) -> Result<Self, BridgeError> {
        layout.validate()?;
        let segment = SharedSegment::create(path, layout.total_size())?;

        // SAFETY: the segment is at least total_size bytes, page aligned, and
        // no other process can have it mapped yet.
        unsafe {
            ptr::write(segment.as_ptr() as *mut RingHeader, RingHeader::from_layout(&layout));
        }
        let ring = Self { segment, layout };
        for slot in 0..layout.capacity as usize {
            ring.generation_cell(slot).store(EMPTY_GENERATION, Ordering::Release);
        }

        tracing::debug!(
            path = %ring.segment.path().display(),
            kind = ?layout.kind,
            capacity = layout.capacity,
            width = layout.width,
            height = layout.height,
            channels = layout.channels,
            "Created slot ring"
        );
        Ok(ring)
    }

    /// Attach to a ring created elsewhere, checking it is the expected kind.
    pub fn attach(path: impl AsRef<Path>, kind: RingKind) -> Result<Self, BridgeError> {
        let segment = SharedSegment::attach(path)?;
        if segment.len() < RingHeader::SIZE {
            return Err(BridgeError::SizeMismatch {
                expected: RingHeader::SIZE,
                actual: segment.len(),
            });
        }

        let header = unsafe { ptr::read(segment.as_ptr() as *const RingHeader) };
        let layout = header.to_layout()?;
        if layout.kind != kind {
            return Err(BridgeError::InvalidLayout(format!(
                "expected {:?} ring, found {:?}",
                kind, layout.kind
            )));
        }
        if segment.len() < layout.total_size() {
            return Err(BridgeError::SizeMismatch {
                expected: layout.total_size(),
                actual: segment.len(),
            });
        }

        Ok(Self { segment, layout })
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity as usize
    }

    pub fn slot_size(&self) -> usize {
        self.layout.slot_size()
    }

    pub fn path(&self) -> &Path {
        self.segment.path()
    }

    /// Slot used for a given frame index.
    #[inline]
    pub fn slot_for(&self, frame_index: u64) -> usize {
        (frame_index % self.layout.capacity as u64) as usize
    }

    #[inline]
    fn generation_cell(&self, slot: usize) -> &AtomicU64 {
        debug_assert!(slot < self.capacity());
        // SAFETY: offset is inside the mapping and 8-byte aligned (header is
        // 40 bytes, mapping is page aligned). The AtomicU64 lives as long as
        // the mapping, which lives as long as &self.
        unsafe {
            let offset = self.layout.generations_offset() + slot * size_of::<u64>();
            &*(self.segment.as_ptr().add(offset) as *const AtomicU64)
        }
    }

    fn check_slot(&self, slot: usize) -> Result<(), BridgeError> {
        if slot >= self.capacity() {
            return Err(BridgeError::SlotOutOfRange {
                slot,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    fn check_len(&self, len: usize) -> Result<(), BridgeError> {
        if len != self.slot_size() {
            return Err(BridgeError::SizeMismatch {
                expected: self.slot_size(),
                actual: len,
            });
        }
        Ok(())
    }

    /// Overwrite `slot` with `pixels` and publish it under `generation`.
    ///
    /// Only the single owning writer may call this. The WRITING marker is
    /// published before the copy starts, so a concurrent reader can never
    /// observe the old and new tag being equal around a partial copy.
    pub fn write(&mut self, slot: usize, pixels: &[u8], generation: u64) -> Result<(), BridgeError> {
        self.check_slot(slot)?;
        self.check_len(pixels.len())?;
        if generation >= WRITING_GENERATION {
            return Err(BridgeError::InvalidLayout(format!(
                "generation {generation} collides with a reserved marker"
            )));
        }

        let cell = self.generation_cell(slot);
        cell.store(WRITING_GENERATION, Ordering::Relaxed);
        fence(Ordering::Release);

        // SAFETY: bounds checked above; the source is a Rust slice and can
        // not overlap the mapping.
        unsafe {
            let dst = self.segment.as_ptr().add(self.layout.slot_offset(slot));
            ptr::copy_nonoverlapping(pixels.as_ptr(), dst, pixels.len());
        }

        cell.store(generation, Ordering::Release);
        Ok(())
    }

    /// Current tag of `slot`, without any read protocol.
    pub fn generation(&self, slot: usize) -> Result<u64, BridgeError> {
        self.check_slot(slot)?;
        Ok(self.generation_cell(slot).load(Ordering::Acquire))
    }

    /// First half of a checked read.
    pub fn begin_read(&self, slot: usize) -> Result<u64, BridgeError> {
        self.check_slot(slot)?;
        Ok(self.generation_cell(slot).load(Ordering::Acquire))
    }

    /// Copy the raw slot bytes into `buf`. Unvalidated on its own.
    pub fn copy_into(&self, slot: usize, buf: &mut [u8]) -> Result<(), BridgeError> {
        self.check_slot(slot)?;
        self.check_len(buf.len())?;
        unsafe {
            let src = self.segment.as_ptr().add(self.layout.slot_offset(slot));
            ptr::copy_nonoverlapping(src as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Allocating variant of [`copy_into`](Self::copy_into).
    pub fn copy(&self, slot: usize) -> Result<Vec<u8>, BridgeError> {
        let mut buf = vec![0u8; self.slot_size()];
        self.copy_into(slot, &mut buf)?;
        Ok(buf)
    }

    /// Second half of a checked read. Orders the preceding copy before the
    /// tag load.
    pub fn end_read(&self, slot: usize) -> Result<u64, BridgeError> {
        self.check_slot(slot)?;
        fence(Ordering::Acquire);
        Ok(self.generation_cell(slot).load(Ordering::Relaxed))
    }

    /// Copy `slot` into `buf` and report whether the copy is exactly frame
    /// `expected`. On `Torn` the contents of `buf` are garbage.
    pub fn read_validated(
        &self,
        slot: usize,
        expected: u64,
        buf: &mut [u8],
    ) -> Result<ReadOutcome, BridgeError> {
        let before = self.begin_read(slot)?;
        if before != expected {
            return Ok(ReadOutcome::Torn {
                before,
                after: before,
                expected,
            });
        }
        self.copy_into(slot, buf)?;
        let after = self.end_read(slot)?;

        if after == expected {
            Ok(ReadOutcome::Valid)
        } else {
            Ok(ReadOutcome::Torn {
                before,
                after,
                expected,
            })
        }
    }
}
