//! The block device: the lowest layer, consumed but not owned by this
//! crate. A real kernel backs `BlockDevice` with a disk or virtio driver;
//! `MemBlockDevice` backs it with plain memory so the rest of the core can
//! be driven and tested without real hardware underneath it.

use crate::error::{Error, Result};
use crate::param::BLOCK_SECTOR_SIZE;

/// One sector's worth of bytes.
pub type Sector = [u8; BLOCK_SECTOR_SIZE];

/// Raw sector-addressed storage.
///
/// Implementations may fail a read or write (a real disk can); this core
/// never retries and always propagates the failure as `Error::Io`.
pub trait BlockDevice {
    /// Total number of addressable sectors.
    fn sector_count(&self) -> u32;

    /// Reads sector `sector_id` into `buf`.
    fn read(&self, sector_id: u32, buf: &mut Sector) -> Result<()>;

    /// Writes `buf` into sector `sector_id`.
    fn write(&self, sector_id: u32, buf: &Sector) -> Result<()>;
}

/// An in-memory `BlockDevice`, for tests and for hosts with no real disk.
pub struct MemBlockDevice {
    sectors: spin::Mutex<Vec<Sector>>,
}

impl MemBlockDevice {
    /// Creates a device with `sector_count` zeroed sectors.
    pub fn new(sector_count: u32) -> Self {
        Self {
            sectors: spin::Mutex::new(vec![[0u8; BLOCK_SECTOR_SIZE]; sector_count as usize]),
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn sector_count(&self) -> u32 {
        self.sectors.lock().len() as u32
    }

    fn read(&self, sector_id: u32, buf: &mut Sector) -> Result<()> {
        let sectors = self.sectors.lock();
        let src = sectors.get(sector_id as usize).ok_or(Error::Io)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write(&self, sector_id: u32, buf: &Sector) -> Result<()> {
        let mut sectors = self.sectors.lock();
        let dst = sectors.get_mut(sector_id as usize).ok_or(Error::Io)?;
        dst.copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_sector() {
        let dev = MemBlockDevice::new(4);
        let mut buf = [0xAB; BLOCK_SECTOR_SIZE];
        dev.write(2, &buf).unwrap();
        buf = [0; BLOCK_SECTOR_SIZE];
        dev.read(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn out_of_range_is_io_error() {
        let dev = MemBlockDevice::new(1);
        let mut buf = [0; BLOCK_SECTOR_SIZE];
        assert_eq!(dev.read(5, &mut buf), Err(Error::Io));
    }
}
