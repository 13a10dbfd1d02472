use crate::errors::BridgeError;

/// Identifies a ring file. ASCII `STNRING1`, little endian.
pub const RING_MAGIC: u64 = u64::from_le_bytes(*b"STNRING1");

/// Generation of a slot that has never been written.
pub const EMPTY_GENERATION: u64 = u64::MAX;

/// Generation stored while a writer is copying into the slot.
pub const WRITING_GENERATION: u64 = u64::MAX - 1;

/// Slot data always begins on a cache line.
const SLOT_ALIGN: usize = 64;

/// SAFETY & MEMORY ORDERING:
///
/// Fixed header at offset 0 of every ring file. It is written once by the
/// creator before any other process attaches and never modified afterwards,
/// so plain (non-atomic) reads are sound for attachers.
///
/// Layout of the whole file:
///
/// ```text
/// [RingHeader; 40 bytes][AtomicU64 x capacity][pad to 64][slot 0]..[slot capacity-1]
/// ```
///
/// The `#[repr(C, align(8))]` keeps the generation array that follows the
/// header 8-byte aligned, which `AtomicU64` requires.
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingHeader {
    pub magic: u64,
    pub kind: u32,
    pub capacity: u32,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub _reserved: u32,
    pub slot_size: u64,
}

impl RingHeader {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn from_layout(layout: &RingLayout) -> Self {
        Self {
            magic: RING_MAGIC,
            kind: layout.kind as u32,
            capacity: layout.capacity,
            width: layout.width,
            height: layout.height,
            channels: layout.channels,
            _reserved: 0,
            slot_size: layout.slot_size() as u64,
        }
    }

    /// Recover the layout, checking magic and internal consistency.
    pub fn to_layout(&self) -> Result<RingLayout, BridgeError> {
        if self.magic != RING_MAGIC {
            return Err(BridgeError::InvalidLayout(format!(
                "bad magic {:#018x}",
                self.magic
            )));
        }
        let kind = RingKind::from_u32(self.kind)
            .ok_or_else(|| BridgeError::InvalidLayout(format!("unknown ring kind {}", self.kind)))?;
        let layout = RingLayout {
            kind,
            capacity: self.capacity,
            width: self.width,
            height: self.height,
            channels: self.channels,
        };
        layout.validate()?;
        if layout.slot_size() as u64 != self.slot_size {
            return Err(BridgeError::InvalidLayout(format!(
                "slot size {} does not match geometry {}x{}x{}",
                self.slot_size, self.width, self.height, self.channels
            )));
        }
        Ok(layout)
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingKind {
    Frame = 1,
    Mask = 2,
}

impl RingKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(RingKind::Frame),
            2 => Some(RingKind::Mask),
            _ => None,
        }
    }
}

/// Geometry of a slot ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    pub kind: RingKind,
    pub capacity: u32,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl RingLayout {
    /// RGB frame ring.
    pub fn frames(capacity: u32, width: u32, height: u32) -> Self {
        Self {
            kind: RingKind::Frame,
            capacity,
            width,
            height,
            channels: 3,
        }
    }

    /// Single channel mask ring.
    pub fn masks(capacity: u32, width: u32, height: u32) -> Self {
        Self {
            kind: RingKind::Mask,
            capacity,
            width,
            height,
            channels: 1,
        }
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.capacity == 0 {
            return Err(BridgeError::InvalidLayout("capacity must be > 0".into()));
        }
        if self.width == 0 || self.height == 0 || self.channels == 0 {
            return Err(BridgeError::InvalidLayout(format!(
                "empty geometry {}x{}x{}",
                self.width, self.height, self.channels
            )));
        }
        Ok(())
    }

    pub fn slot_size(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn generations_offset(&self) -> usize {
        RingHeader::SIZE
    }

    pub fn data_offset(&self) -> usize {
        let end = self.generations_offset() + self.capacity as usize * size_of::<u64>();
        end.div_ceil(SLOT_ALIGN) * SLOT_ALIGN
    }

    pub fn slot_offset(&self, slot: usize) -> usize {
        self.data_offset() + slot * self.slot_size()
    }

    pub fn total_size(&self) -> usize {
        self.slot_offset(self.capacity as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_alignment() {
        assert_eq!(
            std::mem::align_of::<RingHeader>(),
            8,
            "Header must be 8-byte aligned for the AtomicU64 array behind it"
        );
    }

    #[test]
    fn test_header_size() {
        assert_eq!(RingHeader::SIZE, 40);
        assert_eq!(RingHeader::SIZE % 8, 0);
    }

    #[test]
    fn test_markers_cannot_collide_with_frame_indices() {
        assert_ne!(EMPTY_GENERATION, WRITING_GENERATION);
        assert!(WRITING_GENERATION > u32::MAX as u64);
    }

    #[test]
    fn test_layout_offsets() {
        let layout = RingLayout::frames(3, 640, 480);
        assert_eq!(layout.slot_size(), 640 * 480 * 3);
        assert_eq!(layout.generations_offset(), 40);
        // 40 + 3 * 8 = 64
        assert_eq!(layout.data_offset(), 64);
        assert_eq!(layout.slot_offset(2), 64 + 2 * 640 * 480 * 3);
        assert_eq!(layout.total_size(), 64 + 3 * 640 * 480 * 3);

        let wide = RingLayout::masks(8, 4, 4);
        assert_eq!(wide.data_offset(), 128);
        assert_eq!(wide.data_offset() % SLOT_ALIGN, 0);
    }

    #[test]
    fn test_header_round_trips_layout() {
        let layout = RingLayout::masks(3, 320, 240);
        let header = RingHeader::from_layout(&layout);
        assert_eq!(header.to_layout().unwrap(), layout);
    }

    #[test]
    fn test_header_rejects_corruption() {
        let layout = RingLayout::frames(3, 8, 8);

        let mut bad_magic = RingHeader::from_layout(&layout);
        bad_magic.magic = 0;
        assert!(matches!(
            bad_magic.to_layout(),
            Err(BridgeError::InvalidLayout(_))
        ));

        let mut bad_kind = RingHeader::from_layout(&layout);
        bad_kind.kind = 9;
        assert!(bad_kind.to_layout().is_err());

        let mut bad_size = RingHeader::from_layout(&layout);
        bad_size.slot_size += 1;
        assert!(bad_size.to_layout().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_geometry() {
        assert!(RingLayout::frames(0, 8, 8).validate().is_err());
        assert!(RingLayout::frames(3, 0, 8).validate().is_err());
        assert!(RingLayout::masks(3, 8, 8).validate().is_ok());
    }
}
