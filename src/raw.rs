//! On-flash layout of the ESP-IDF partition table.
//!
//! The table is a run of 32-byte slots: entry records, then one checksum
//! record, then one end marker. Multi-byte fields are little-endian. The
//! accessors below decode and encode every field explicitly instead of
//! overlaying a struct, so byte order and padding stay unambiguous.

use crate::Label;

/// Every table record occupies exactly 32 bytes.
pub const SLOT_LENGTH: usize = 32;
/// Labels are fixed-width and not necessarily NUL-terminated.
pub const LABEL_LENGTH: usize = 16;
/// The checksum record carries an MD5 digest in its trailing 16 bytes.
pub const CHECKSUM_LENGTH: usize = 16;

/// Leading bytes of an entry record.
pub const ENTRY_MAGIC: [u8; 2] = [0xAA, 0x50];
/// Leading bytes of the checksum record.
pub const CHECKSUM_MAGIC: [u8; 2] = [0xEB, 0xEB];
/// Leading bytes of the end marker; the rest of that slot is don't-care.
pub const END_MARKER: [u8; 2] = [0xFF, 0xFF];

// Entry record field offsets.
const TYPE_OFFSET: usize = 2;
const SUBTYPE_OFFSET: usize = 3;
const OFFSET_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const LABEL_OFFSET: usize = 12;
const FLAGS_OFFSET: usize = 28;

/// Byte offset of the digest inside the checksum record.
pub const DIGEST_OFFSET: usize = SLOT_LENGTH - CHECKSUM_LENGTH;

/// Application subtype of the factory image.
pub const SUBTYPE_FACTORY: u8 = 0x00;
/// Inclusive bounds of the OTA slot subtypes.
pub const SUBTYPE_OTA_MIN: u8 = 0x10;
pub const SUBTYPE_OTA_MAX: u8 = 0x20;

/// Known partition type bytes. Tables may also contain vendor-specific type
/// bytes; those entries are legal records, they just never take part in a
/// role swap.
#[derive(strum::FromRepr, strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PartitionType {
    App = 0x00,
    Data = 0x01,
}

/// What a 32-byte slot is, judged by its leading sentinel bytes.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotKind {
    Entry,
    Checksum,
    EndMarker,
    Malformed,
}

/// Classify one slot. Only the first two bytes take part; the type byte of
/// an entry does not affect classification.
pub fn classify(slot: &[u8]) -> SlotKind {
    match [slot[0], slot[1]] {
        ENTRY_MAGIC => SlotKind::Entry,
        CHECKSUM_MAGIC => SlotKind::Checksum,
        END_MARKER => SlotKind::EndMarker,
        _ => SlotKind::Malformed,
    }
}

/// Whether `subtype` names one of the OTA application slots.
pub fn is_ota_subtype(subtype: u8) -> bool {
    (SUBTYPE_OTA_MIN..=SUBTYPE_OTA_MAX).contains(&subtype)
}

/// Read-only field access over one entry record.
pub struct EntrySlot<'a> {
    slot: &'a [u8],
}

impl<'a> EntrySlot<'a> {
    /// # Panics
    /// Panics if `slot` is not exactly [`SLOT_LENGTH`] bytes.
    pub fn new(slot: &'a [u8]) -> Self {
        assert!(
            slot.len() == SLOT_LENGTH,
            "entry slot requires {} bytes, got {}",
            SLOT_LENGTH,
            slot.len()
        );
        Self { slot }
    }

    pub fn magic(&self) -> [u8; 2] {
        [self.slot[0], self.slot[1]]
    }

    /// Raw type byte; see [`PartitionType`] for the known values.
    pub fn type_byte(&self) -> u8 {
        self.slot[TYPE_OFFSET]
    }

    pub fn partition_type(&self) -> Option<PartitionType> {
        PartitionType::from_repr(self.type_byte())
    }

    pub fn subtype(&self) -> u8 {
        self.slot[SUBTYPE_OFFSET]
    }

    /// Flash byte address of the partition.
    pub fn offset(&self) -> u32 {
        read_u32(self.slot, OFFSET_OFFSET)
    }

    pub fn size(&self) -> u32 {
        read_u32(self.slot, SIZE_OFFSET)
    }

    pub fn label(&self) -> Label {
        let raw: [u8; LABEL_LENGTH] = self.slot[LABEL_OFFSET..LABEL_OFFSET + LABEL_LENGTH]
            .try_into()
            .unwrap();
        Label::from_raw(raw)
    }

    pub fn flags(&self) -> u32 {
        read_u32(self.slot, FLAGS_OFFSET)
    }
}

/// Mutable field access over one entry record.
pub struct EntrySlotMut<'a> {
    slot: &'a mut [u8],
}

impl<'a> EntrySlotMut<'a> {
    /// # Panics
    /// Panics if `slot` is not exactly [`SLOT_LENGTH`] bytes.
    pub fn new(slot: &'a mut [u8]) -> Self {
        assert!(
            slot.len() == SLOT_LENGTH,
            "entry slot requires {} bytes, got {}",
            SLOT_LENGTH,
            slot.len()
        );
        Self { slot }
    }

    /// Stamp the entry magic over the first two bytes.
    pub fn set_magic(&mut self) {
        self.slot[..2].copy_from_slice(&ENTRY_MAGIC);
    }

    pub fn set_type_byte(&mut self, type_byte: u8) {
        self.slot[TYPE_OFFSET] = type_byte;
    }

    pub fn set_subtype(&mut self, subtype: u8) {
        self.slot[SUBTYPE_OFFSET] = subtype;
    }

    pub fn set_offset(&mut self, offset: u32) {
        write_u32(self.slot, OFFSET_OFFSET, offset);
    }

    pub fn set_size(&mut self, size: u32) {
        write_u32(self.slot, SIZE_OFFSET, size);
    }

    pub fn set_label(&mut self, label: &Label) {
        self.slot[LABEL_OFFSET..LABEL_OFFSET + LABEL_LENGTH].copy_from_slice(label.as_bytes());
    }

    pub fn set_flags(&mut self, flags: u32) {
        write_u32(self.slot, FLAGS_OFFSET, flags);
    }
}

fn read_u32(slot: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(slot[offset..offset + 4].try_into().unwrap())
}

fn write_u32(slot: &mut [u8], offset: usize, value: u32) {
    slot[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
