use thiserror::Error;

/// Errors that can occur while validating, rewriting, or committing the
/// partition table. The list is likely to stay as is but marked as
/// non-exhaustive to allow for future additions without breaking the API.
#[derive(Error, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The table base address has to be aligned to the erase granularity.
    #[error("invalid partition table address")]
    InvalidTableAddress,

    /// The aligned table size has to be a non-zero multiple of the erase
    /// granularity, cover the logical size, and leave room for at least one
    /// record.
    #[error("invalid partition table size")]
    InvalidTableSize,

    /// The OTA boot data region has to be erase-aligned.
    #[error("invalid OTA boot data range")]
    InvalidOtadataRange,

    /// A staged table image has to match the logical table size exactly.
    #[error("unexpected partition table size: {0}")]
    UnexpectedTableSize(usize),

    /// A staged table image has to start with an entry record.
    #[error("incorrect magic number: 0x{0:02x}{1:02x}")]
    IncorrectMagic(u8, u8),

    /// A slot matched none of the three record sentinels. Carries the slot
    /// index.
    #[error("illegal record in partition table at slot {0}")]
    IllegalRecord(usize),

    /// Only the end marker may follow the checksum record. Carries the slot
    /// index of the offending record.
    #[error("checksum record not followed by end marker at slot {0}")]
    ChecksumNotLast(usize),

    /// The scan covered the whole logical table without finding an end
    /// marker.
    #[error("no end marker in partition table")]
    NoEndMarker,

    /// The table carries no checksum record ahead of its end marker.
    #[error("no checksum record in partition table")]
    NoChecksum,

    /// A role swap needs exactly two OTA application entries.
    #[error("incorrect amount of OTA partitions: {0}")]
    OtaCount(u32),

    /// No application entry carries the factory subtype.
    #[error("no factory partition entry")]
    NoFactoryEntry,

    /// No OTA entry differs from the running partition's subtype.
    #[error("no alternate OTA partition entry")]
    NoAlternateEntry,

    /// The flash primitive reported a failure.
    #[error("flash operation failed")]
    FlashError,

    /// Every erase-then-write attempt failed. The table region is left in an
    /// indeterminate state, possibly erased, possibly partially written.
    #[error("gave up replacing the partition table")]
    CommitExhausted,
}
