use embedded_storage::nor_flash::NorFlash;

use crate::Label;
use crate::raw::PartitionType;

/// See README.md for an example implementation.
pub trait Platform: Md5 + NorFlash {}

impl<T: Md5 + NorFlash> Platform for T {}

pub type FnMd5 = fn(data: &[u8]) -> [u8; 16];

/// MD5 digest over a byte range. The ESP ROM ships an implementation; hosts
/// wire in a software digest.
pub trait Md5 {
    fn md5(data: &[u8]) -> [u8; 16];
}

impl<T: Md5> Md5 for &mut T {
    fn md5(data: &[u8]) -> [u8; 16] {
        T::md5(data)
    }
}

/// Boot environment the operations run inside: the running-partition query,
/// the rollback and restart primitives, and the blocking delay between
/// commit attempts.
///
/// On hardware, `restart` and `mark_invalid_and_rollback` reboot the device
/// and do not return control in any useful sense. The operations still
/// return right after invoking them, so test doubles can be plain recorders.
pub trait System {
    /// Identity of the partition the current image was booted from.
    fn running_partition(&mut self) -> RunningPartition;

    /// Mark the running image invalid and reboot into the rollback image.
    fn mark_invalid_and_rollback(&mut self);

    /// Unconditional device restart.
    fn restart(&mut self);

    /// Block for at least `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

impl<S: System> System for &mut S {
    fn running_partition(&mut self) -> RunningPartition {
        S::running_partition(self)
    }

    fn mark_invalid_and_rollback(&mut self) {
        S::mark_invalid_and_rollback(self)
    }

    fn restart(&mut self) {
        S::restart(self)
    }

    fn delay_ms(&mut self, ms: u32) {
        S::delay_ms(self, ms)
    }
}

/// Identity of the currently executing partition as reported by the OTA
/// layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RunningPartition {
    /// Flash byte address the image runs from.
    pub address: u32,
    pub kind: PartitionType,
    pub subtype: u8,
    pub label: Label,
}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::Md5;

    impl Md5 for FlashStorage<'_> {
        fn md5(data: &[u8]) -> [u8; 16] {
            let mut ctx = esp_hal::rom::md5::Context::new();
            ctx.consume(data);
            *ctx.compute()
        }
    }
}
