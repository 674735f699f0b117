#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

mod commit;
pub mod error;
pub mod platform;
pub mod raw;
pub mod table;

use crate::raw::LABEL_LENGTH;

/// A 16-byte partition label. Fixed width, NUL-padded when shorter, and not
/// necessarily NUL-terminated: a 16-character label uses the full field.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Label([u8; LABEL_LENGTH]);

impl Label {
    /// Creates a 16 byte, null-padded label.
    ///
    /// Usage: `Label::from_array(b"ota_0")`
    ///
    /// Tip: use a const context if possible to ensure that the label is transformed at compile time:
    ///   `let my_label = const { Label::from_array(b"ota_0") };`
    pub const fn from_array<const M: usize>(src: &[u8; M]) -> Self {
        assert!(M <= LABEL_LENGTH);
        let mut dst = [0u8; LABEL_LENGTH];
        let mut i = 0;
        while i < M {
            dst[i] = src[i];
            i += 1;
        }
        Self(dst)
    }

    /// Creates a 16 byte, null-padded label.
    ///
    /// Usage: `Label::from_slice(b"ota_0")`
    ///
    /// Tip: use a const context if possible to ensure that the label is transformed at compile time:
    ///   `let my_label = const { Label::from_slice("ota_0".as_bytes()) };`
    pub const fn from_slice(src: &[u8]) -> Self {
        assert!(src.len() <= LABEL_LENGTH);
        let mut dst = [0u8; LABEL_LENGTH];
        let mut i = 0;
        while i < src.len() {
            dst[i] = src[i];
            i += 1;
        }
        Self(dst)
    }

    /// Creates a 16 byte, null-padded label.
    ///
    /// Usage: `Label::from_str("ota_0")`
    ///
    /// Tip: use a const context if possible to ensure that the label is transformed at compile time:
    ///   `let my_label = const { Label::from_str("ota_0") };`
    pub const fn from_str(s: &str) -> Self {
        let bytes = s.as_bytes();
        Self::from_slice(bytes)
    }

    /// Wraps the exact 16 bytes of a label field read off the table.
    pub const fn from_raw(raw: [u8; LABEL_LENGTH]) -> Self {
        Self(raw)
    }

    /// Converts a label to a byte array.
    pub const fn as_bytes(&self) -> &[u8; LABEL_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // for debug representation, print as binary string
        write!(f, "Label(b\"")?;

        for &byte in &self.0 {
            // escape_default would escape 0 as \x00, but \0 is more readable
            if byte == 0 {
                write!(f, "\\0")?;
                continue;
            }

            write!(f, "{}", core::ascii::escape_default(byte))?;
        }

        write!(f, "\")")
    }
}

impl fmt::Display for Label {
    /// Prints the label up to its first NUL byte, the way the bootloader
    /// logs it.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in self.0.iter().take_while(|&&byte| byte != 0) {
            write!(f, "{}", core::ascii::escape_default(byte))?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Label {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

extern crate alloc;

use crate::error::Error;
use crate::platform::{Platform, System};
use crate::raw::{PartitionType, SLOT_LENGTH, SUBTYPE_FACTORY, SlotKind, classify};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use log::{error, info, warn};

/// Addresses, sizes, and the retry policy the operations run with.
///
/// Every flash touch goes through these values, so the pipeline can be run
/// against small in-memory regions and a zero backoff under test. The
/// default is the stock ESP32 layout.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Flash byte address of the partition table.
    pub table_address: u32,
    /// Logical size of the table; all records live inside this prefix.
    pub table_size: usize,
    /// Erase-aligned size of the table region; erases and writes cover this
    /// full extent.
    pub table_aligned_size: usize,
    /// Flash byte address of the OTA boot data region.
    pub otadata_address: u32,
    /// Size of the OTA boot data region.
    pub otadata_size: usize,
    /// Address the running image has to occupy before a table patch.
    pub expected_running_address: u32,
    /// Erase-then-write attempts before a commit gives up.
    pub retry_limit: u32,
    /// Backoff after a failed commit attempt, in milliseconds.
    pub retry_wait_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_address: 0x8000,
            table_size: 0xC00,
            table_aligned_size: 0x1000,
            otadata_address: 0xD000,
            otadata_size: 0x2000,
            expected_running_address: 0x1B_0000,
            retry_limit: 10,
            retry_wait_ms: 100,
        }
    }
}

/// Which running-partition state an operation requires before it may touch
/// the table.
///
/// This check is the only guard against applying a swap to a table that was
/// already swapped, so the operations treat a failed check as an abort, not
/// as something to retry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Expected {
    /// The running image has to sit at this flash address.
    AtAddress(u32),
    /// The running image must not carry the factory role.
    NotFactory,
}

/// Boot-partition role management over one partition-table region.
///
/// Holds the flash access and the boot-environment collaborators for the
/// duration of a maintenance window. The operations are deliberately
/// all-or-nothing: they either finish with a reboot or back out with a
/// rollback, and none of them is safe to run concurrently with another
/// instance over the same table.
pub struct BootSwap<T: Platform, S: System> {
    hal: T,
    sys: S,
    config: Config,
}

impl<T: Platform, S: System> BootSwap<T, S> {
    /// Validates the configured geometry against the flash erase granularity
    /// before any operation can touch the table.
    pub fn new(config: Config, hal: T, sys: S) -> Result<Self, Error> {
        if !(config.table_address as usize).is_multiple_of(T::ERASE_SIZE) {
            return Err(Error::InvalidTableAddress);
        }

        if config.table_aligned_size == 0
            || !config.table_aligned_size.is_multiple_of(T::ERASE_SIZE)
            || config.table_size > config.table_aligned_size
            || config.table_size < SLOT_LENGTH
        {
            return Err(Error::InvalidTableSize);
        }

        if !(config.otadata_address as usize).is_multiple_of(T::ERASE_SIZE)
            || !config.otadata_size.is_multiple_of(T::ERASE_SIZE)
        {
            return Err(Error::InvalidOtadataRange);
        }

        Ok(Self { hal, sys, config })
    }

    /// Check the running partition against `expected`.
    pub fn verify_running(&mut self, expected: Expected) -> bool {
        let running = self.sys.running_partition();
        match expected {
            Expected::AtAddress(address) => running.address == address,
            Expected::NotFactory => {
                !(running.kind == PartitionType::App && running.subtype == SUBTYPE_FACTORY)
            }
        }
    }

    /// Replace the on-flash table with `staged`, a full logical-size image.
    ///
    /// The device has to be running from the expected address; anything else
    /// means the table was already patched, so the call returns without
    /// touching flash. A staged image that fails validation marks the
    /// running image invalid and rolls back. Every other path ends in an
    /// unconditional restart, whether or not the commit went through.
    pub fn patch_boot_table(&mut self, staged: &[u8]) {
        let running = self.sys.running_partition();
        info!("running partition: {}", running.label);

        if !self.verify_running(Expected::AtAddress(self.config.expected_running_address)) {
            warn!(
                "running partition is not at {:#x}, leaving the table alone",
                self.config.expected_running_address
            );
            return;
        }

        let table = match self.stage_aligned(staged) {
            Ok(table) => table,
            Err(err) => {
                error!("rejecting staged partition table: {err}");
                self.sys.mark_invalid_and_rollback();
                return;
            }
        };

        if let Err(err) = commit::replace_table(&mut self.hal, &mut self.sys, &self.config, &table)
        {
            error!("failed to replace partition table: {err}");
        }

        self.restart();
    }

    /// Promote the OTA slot that is not running to the factory role and
    /// demote the factory entry to the vacated OTA role, then commit the
    /// rewritten table and restart.
    ///
    /// The running image must not already hold the factory role; if it
    /// does, or the table fails validation, or the OTA boot data cannot be
    /// erased, the running image is marked invalid and rolled back.
    pub fn factory_swap(&mut self) {
        info!("swapping the factory partition");

        // TODO: also check that the rollback target holds a bootable OTA
        // image once the OTA query layer exposes the fallback partition.
        if !self.verify_running(Expected::NotFactory) {
            warn!("running partition already holds the factory role");
            self.sys.mark_invalid_and_rollback();
            return;
        }

        let table = match self.prepare_swapped_table() {
            Ok(table) => table,
            Err(err) => {
                error!("failed to prepare new partition table: {err}");
                self.sys.mark_invalid_and_rollback();
                return;
            }
        };

        // The swapped table must boot through the factory entry; stale OTA
        // boot data would keep selecting the demoted slot.
        info!("erasing OTA boot data");
        let from = self.config.otadata_address;
        let to = from + self.config.otadata_size as u32;
        if let Err(err) = self.hal.erase(from, to) {
            error!("failed to erase OTA boot data: {err:?}");
            self.sys.mark_invalid_and_rollback();
            return;
        }

        info!("entering critical zone");
        match commit::replace_table(&mut self.hal, &mut self.sys, &self.config, &table) {
            Ok(()) => info!("leaving critical zone"),
            Err(err) => error!("failed to replace partition table: {err}"),
        }

        self.restart();
    }

    /// Check a staged image and pad it to the erase-aligned size with 0xFF,
    /// the erased-flash fill.
    fn stage_aligned(&self, staged: &[u8]) -> Result<Vec<u8>, Error> {
        if staged.len() != self.config.table_size {
            return Err(Error::UnexpectedTableSize(staged.len()));
        }

        if classify(&staged[..SLOT_LENGTH]) != SlotKind::Entry {
            return Err(Error::IncorrectMagic(staged[0], staged[1]));
        }

        let mut table = vec![0xFF; self.config.table_aligned_size];
        table[..staged.len()].copy_from_slice(staged);
        Ok(table)
    }

    /// Read the table region, locate the swap participants, exchange their
    /// roles, and restamp the checksum. The returned buffer spans the full
    /// erase-aligned region, ready to commit.
    fn prepare_swapped_table(&mut self) -> Result<Vec<u8>, Error> {
        let mut table = vec![0u8; self.config.table_aligned_size];
        if let Err(err) = self.hal.read(self.config.table_address, &mut table) {
            warn!("failed to read partition table: {err:?}");
            return Err(Error::FlashError);
        }

        let running = self.sys.running_partition();
        let facts = table::parse(&table[..self.config.table_size], running.subtype)?;

        table::swap_roles(&mut table, &facts);
        table::stamp_checksum(&mut table, &facts, T::md5);
        Ok(table)
    }

    fn restart(&mut self) {
        info!("restarting");
        log::logger().flush();
        self.sys.restart();
    }
}
