//! In-memory work on a table image: scanning and validating the record run,
//! swapping the factory and alternate roles, and restamping the checksum.
//!
//! Nothing here touches flash. Callers read the table region into a buffer,
//! run these functions over it, and commit the result.

use crate::Label;
use crate::error::Error;
use crate::platform::FnMd5;
use crate::raw::{
    CHECKSUM_LENGTH, DIGEST_OFFSET, EntrySlot, EntrySlotMut, PartitionType, SLOT_LENGTH,
    SUBTYPE_FACTORY, SlotKind, classify, is_ota_subtype,
};

/// Facts extracted from a structurally valid table: where the two swap
/// participants live, their current labels, and the checksummed extent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TableFacts {
    /// Byte offset of the factory entry record.
    pub factory_offset: usize,
    pub factory_label: Label,
    /// Byte offset of the OTA entry that is not currently running.
    pub alternate_offset: usize,
    pub alternate_subtype: u8,
    pub alternate_label: Label,
    /// Byte offset of the checksum record.
    pub checksum_offset: usize,
    /// Bytes covered by the checksum: everything ahead of its record.
    pub content_len: usize,
}

/// Scan `table` in 32-byte strides and validate the record run.
///
/// `running_subtype` identifies the OTA entry currently executing; the other
/// OTA entry becomes the alternate. Pass the logical table region only, not
/// the erase-aligned buffer; bytes past the end marker are never records.
pub fn parse(table: &[u8], running_subtype: u8) -> Result<TableFacts, Error> {
    let mut factory: Option<(usize, Label)> = None;
    let mut alternate: Option<(usize, u8, Label)> = None;
    let mut ota_count: u32 = 0;
    let mut checksum_offset: Option<usize> = None;
    let mut end_marker_found = false;

    let mut offset = 0;
    while offset + SLOT_LENGTH <= table.len() {
        let slot = &table[offset..offset + SLOT_LENGTH];
        let kind = classify(slot);
        #[cfg(feature = "debug-logs")]
        log::trace!("slot {}: {:?}", offset / SLOT_LENGTH, kind);

        match kind {
            SlotKind::EndMarker => {
                if checksum_offset.is_none() {
                    return Err(Error::NoChecksum);
                }
                end_marker_found = true;
                break;
            }
            // Anything but the end marker after the checksum record is
            // garbage, including a second checksum record.
            _ if checksum_offset.is_some() => {
                return Err(Error::ChecksumNotLast(offset / SLOT_LENGTH));
            }
            SlotKind::Checksum => {
                checksum_offset = Some(offset);
            }
            SlotKind::Entry => {
                let entry = EntrySlot::new(slot);
                if entry.partition_type() == Some(PartitionType::App) {
                    let subtype = entry.subtype();
                    if subtype == SUBTYPE_FACTORY {
                        factory = Some((offset, entry.label()));
                    } else if is_ota_subtype(subtype) {
                        ota_count += 1;
                        if subtype != running_subtype {
                            alternate = Some((offset, subtype, entry.label()));
                        }
                    }
                }
            }
            SlotKind::Malformed => {
                return Err(Error::IllegalRecord(offset / SLOT_LENGTH));
            }
        }

        offset += SLOT_LENGTH;
    }

    if !end_marker_found {
        return Err(Error::NoEndMarker);
    }
    if ota_count != 2 {
        return Err(Error::OtaCount(ota_count));
    }
    let Some((factory_offset, factory_label)) = factory else {
        return Err(Error::NoFactoryEntry);
    };
    let Some((alternate_offset, alternate_subtype, alternate_label)) = alternate else {
        return Err(Error::NoAlternateEntry);
    };
    let Some(checksum_offset) = checksum_offset else {
        return Err(Error::NoChecksum);
    };

    Ok(TableFacts {
        factory_offset,
        factory_label,
        alternate_offset,
        alternate_subtype,
        alternate_label,
        checksum_offset,
        content_len: checksum_offset,
    })
}

/// Exchange the boot roles in place: the alternate OTA entry takes over the
/// factory subtype and label, the factory entry takes the alternate's. Only
/// the subtype and label fields of those two entries change.
///
/// The checksum is stale afterwards; follow up with [`stamp_checksum`].
pub fn swap_roles(table: &mut [u8], facts: &TableFacts) {
    let mut alternate =
        EntrySlotMut::new(&mut table[facts.alternate_offset..facts.alternate_offset + SLOT_LENGTH]);
    alternate.set_subtype(SUBTYPE_FACTORY);
    alternate.set_label(&facts.factory_label);

    let mut factory =
        EntrySlotMut::new(&mut table[facts.factory_offset..facts.factory_offset + SLOT_LENGTH]);
    factory.set_subtype(facts.alternate_subtype);
    factory.set_label(&facts.alternate_label);
}

/// Recompute the digest over everything ahead of the checksum record and
/// store it in the record's trailing bytes.
pub fn stamp_checksum(table: &mut [u8], facts: &TableFacts, md5: FnMd5) {
    let digest = md5(&table[..facts.content_len]);
    let at = facts.checksum_offset + DIGEST_OFFSET;
    table[at..at + CHECKSUM_LENGTH].copy_from_slice(&digest);
}
