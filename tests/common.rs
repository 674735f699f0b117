#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use esp_bootswap::platform::{RunningPartition, System};
use esp_bootswap::raw::{
    CHECKSUM_MAGIC, DIGEST_OFFSET, ENTRY_MAGIC, PartitionType, SLOT_LENGTH, SUBTYPE_FACTORY,
};
use esp_bootswap::{Config, Label};

pub const FLASH_SECTOR_SIZE: usize = 4096;
// Taken from https://github.com/esp-rs/esp-hal/blob/main/esp-storage/src/stub.rs
pub const WORD_SIZE: usize = 4;

pub const APP: u8 = PartitionType::App as u8;
pub const DATA: u8 = PartitionType::Data as u8;

// Test flash layout: otadata in sector 1, the table in sector 2.
pub const OTADATA_ADDRESS: u32 = 0x1000;
pub const TABLE_ADDRESS: u32 = 0x2000;
pub const EXPECTED_RUNNING_ADDRESS: u32 = 0x16_0000;

pub fn test_config(table_size: usize) -> Config {
    Config {
        table_address: TABLE_ADDRESS,
        table_size,
        table_aligned_size: FLASH_SECTOR_SIZE,
        otadata_address: OTADATA_ADDRESS,
        otadata_size: FLASH_SECTOR_SIZE,
        expected_running_address: EXPECTED_RUNNING_ADDRESS,
        retry_limit: 10,
        retry_wait_ms: 100,
    }
}

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    /// Upcoming read calls to fail before behaving again.
    pub read_faults: usize,
    /// Upcoming erase calls to fail before behaving again.
    pub erase_faults: usize,
    /// Upcoming write calls to fail before behaving again.
    pub write_faults: usize,
    /// Every erase call, including failed ones.
    pub erase_attempts: usize,
    /// Every write call, including failed ones.
    pub write_attempts: usize,
    /// Successful operations only.
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            ..Default::default()
        }
    }

    /// Copy `bytes` straight into the backing buffer, bypassing the NOR
    /// write semantics.
    pub fn load(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    fn take_fault(budget: &mut usize) -> bool {
        if *budget > 0 {
            *budget -= 1;
            println!("    flash: FAULT");
            return true;
        }
        false
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));

        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if Self::take_fault(&mut self.read_faults) {
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );

        self.erase_attempts += 1;
        if Self::take_fault(&mut self.erase_faults) {
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE as _));

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );

        self.write_attempts += 1;
        if Self::take_fault(&mut self.write_faults) {
            return Err(FlashError);
        }
        assert!(bytes.len() > 0);

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // the esp flash we can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

impl esp_bootswap::platform::Md5 for Flash {
    fn md5(data: &[u8]) -> [u8; 16] {
        md5_digest(data)
    }
}

pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Records the boot-environment side effects an operation asks for, in
/// order.
pub struct FakeSystem {
    pub running: RunningPartition,
    pub actions: Vec<Action>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Action {
    Rollback,
    Restart,
    Delay { ms: u32 },
}

impl FakeSystem {
    pub fn running_from(address: u32, subtype: u8, label: &str) -> Self {
        Self {
            running: RunningPartition {
                address,
                kind: PartitionType::App,
                subtype,
                label: Label::from_str(label),
            },
            actions: Vec::new(),
        }
    }

    pub fn running_factory() -> Self {
        Self::running_from(0x1_0000, SUBTYPE_FACTORY, "factory")
    }

    pub fn rollbacks(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| matches!(action, Action::Rollback))
            .count()
    }

    pub fn restarts(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| matches!(action, Action::Restart))
            .count()
    }

    pub fn delays(&self) -> Vec<u32> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                Action::Delay { ms } => Some(*ms),
                _ => None,
            })
            .collect()
    }
}

impl System for FakeSystem {
    fn running_partition(&mut self) -> RunningPartition {
        self.running
    }

    fn mark_invalid_and_rollback(&mut self) {
        println!("    sys: rollback");
        self.actions.push(Action::Rollback);
    }

    fn restart(&mut self) {
        println!("    sys: restart");
        self.actions.push(Action::Restart);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.actions.push(Action::Delay { ms });
    }
}

/// Byte-level table builder. Records are laid out by hand so the tests keep
/// an independent picture of the on-flash format.
pub struct TableBuilder {
    data: Vec<u8>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn entry(mut self, type_byte: u8, subtype: u8, offset: u32, size: u32, label: &str) -> Self {
        let mut slot = [0u8; SLOT_LENGTH];
        slot[..2].copy_from_slice(&ENTRY_MAGIC);
        slot[2] = type_byte;
        slot[3] = subtype;
        slot[4..8].copy_from_slice(&offset.to_le_bytes());
        slot[8..12].copy_from_slice(&size.to_le_bytes());
        slot[12..28].copy_from_slice(Label::from_str(label).as_bytes());
        // flags stay zero
        self.data.extend_from_slice(&slot);
        self
    }

    pub fn raw_slot(mut self, slot: [u8; SLOT_LENGTH]) -> Self {
        self.data.extend_from_slice(&slot);
        self
    }

    /// Append the checksum record: magic, 0xFF padding, and the MD5 digest
    /// of everything appended so far.
    pub fn checksum(mut self) -> Self {
        let digest = md5_digest(&self.data);
        let mut slot = [0xFFu8; SLOT_LENGTH];
        slot[..2].copy_from_slice(&CHECKSUM_MAGIC);
        slot[DIGEST_OFFSET..].copy_from_slice(&digest);
        self.data.extend_from_slice(&slot);
        self
    }

    pub fn end_marker(mut self) -> Self {
        self.data.extend_from_slice(&[0xFF; SLOT_LENGTH]);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

/// Swap-ready table: two data partitions, factory plus two OTA slots, one
/// vendor-typed entry, checksum record, end marker.
///
/// Slot indices, for tests poking at single records:
/// 0 nvs, 1 otadata, 2 factory, 3 ota_0, 4 ota_1, 5 cfg (vendor type),
/// 6 checksum, 7 end marker.
pub fn sample_table() -> Vec<u8> {
    TableBuilder::new()
        .entry(DATA, 0x02, 0x9000, 0x4000, "nvs")
        .entry(DATA, 0x00, 0xD000, 0x2000, "otadata")
        .entry(APP, SUBTYPE_FACTORY, 0x1_0000, 0x15_0000, "factory")
        .entry(APP, 0x10, 0x16_0000, 0x15_0000, "ota_0")
        .entry(APP, 0x11, 0x2B_0000, 0x15_0000, "ota_1")
        .entry(0x40, 0x00, 0x40_0000, 0x1000, "cfg")
        .checksum()
        .end_marker()
        .build()
}
