//! Destructive commit of a finalized table image.
//!
//! There is no staging area in flash for the table, so replacing it means
//! erasing the live copy first. A reset between the erase and a complete
//! write leaves the device unbootable; the retry loop below narrows that
//! window, it cannot close it.

use log::{info, warn};

use crate::Config;
use crate::error::Error;
use crate::platform::{Platform, System};

/// Replace the on-flash table region with `table`, retrying on failure.
///
/// `table` has to span the full erase-aligned region. Each attempt erases
/// the region and rewrites it; a failed erase or write abandons the attempt,
/// waits out the configured backoff, and starts over from the erase. After
/// the last attempt fails the region is indeterminate, possibly erased,
/// possibly partially written.
pub(crate) fn replace_table<T: Platform, S: System>(
    hal: &mut T,
    sys: &mut S,
    config: &Config,
    table: &[u8],
) -> Result<(), Error> {
    let from = config.table_address;
    let to = from + config.table_aligned_size as u32;

    for attempt in 1..=config.retry_limit {
        info!("replacing partition table, attempt {attempt}/{}", config.retry_limit);

        if let Err(err) = hal.erase(from, to) {
            warn!("failed to erase partition table: {err:?}");
            sys.delay_ms(config.retry_wait_ms);
            continue;
        }

        if let Err(err) = hal.write(from, table) {
            warn!("failed to write partition table: {err:?}");
            sys.delay_ms(config.retry_wait_ms);
            continue;
        }

        return Ok(());
    }

    Err(Error::CommitExhausted)
}
