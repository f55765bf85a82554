//! The open-inode table: the place where concurrent opens of the same
//! sector converge on a single in-memory inode, so two handles on the same
//! file observe each other's writes and agree on one `deny_write_count`.
//!
//! Mirrors the role the teacher's own `Itable` plays for its `Inode`
//! entries — a table-wide lock that is held only long enough to find or
//! insert an entry, handing back a reference whose own lock covers
//! everything else.

use std::sync::Arc;

use crate::error::Result;
use crate::free_map::FreeMap;
use crate::inode::{InodeStore, OnDiskInode};
use crate::lock::{Sleeplock, Spinlock};

struct OpenInodeState {
    disk: OnDiskInode,
    deny_write_count: u32,
    removed: bool,
}

/// One in-memory inode, shared by every open handle on its sector.
///
/// `open_count` is bookkeeping for the table (how many handles reference
/// this entry) and is only ever touched while the table's own lock is
/// held, in `OpenInodeTable::open`/`close`. Everything else — the cached
/// disk image, `deny_write_count`, `removed` — lives behind `state`, whose
/// lock a caller holds for the duration of a read/write/close.
pub struct OpenInode {
    sector: u32,
    open_count: Spinlock<u32>,
    state: Sleeplock<OpenInodeState>,
}

impl OpenInode {
    fn new(sector: u32, disk: OnDiskInode) -> Self {
        Self {
            sector,
            open_count: Spinlock::new(1),
            state: Sleeplock::new(OpenInodeState {
                disk,
                deny_write_count: 0,
                removed: false,
            }),
        }
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn is_dir(&self) -> bool {
        self.state.lock().disk.is_dir()
    }

    pub fn length(&self) -> usize {
        self.state.lock().disk.length()
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    pub fn read_at(&self, store: &InodeStore, buf: &mut [u8], offset: usize) -> Result<usize> {
        let state = self.state.lock();
        store.read_at(&state.disk, buf, offset)
    }

    /// Returns `0` without touching the device if a `deny_write` is
    /// outstanding, matching the short-write contract callers see from a
    /// denied write versus an exhausted free map.
    pub fn write_at(&self, store: &InodeStore, buf: &[u8], offset: usize) -> Result<usize> {
        let mut state = self.state.lock();
        if state.deny_write_count > 0 {
            return Ok(0);
        }
        store.write_at(self.sector, &mut state.disk, buf, offset)
    }

    pub fn deny_write(&self) {
        let open_count = *self.open_count.lock();
        let mut state = self.state.lock();
        debug_assert!(
            state.deny_write_count < open_count,
            "deny_write_count must not exceed open_count"
        );
        state.deny_write_count += 1;
    }

    pub fn allow_write(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.deny_write_count > 0, "allow_write without a matching deny_write");
        state.deny_write_count -= 1;
    }

    fn mark_removed(&self) {
        self.state.lock().removed = true;
    }
}

/// A process-wide, mutex-protected registry of `OpenInode`, one entry per
/// sector currently referenced by any open handle.
pub struct OpenInodeTable {
    entries: Spinlock<Vec<Arc<OpenInode>>>,
}

impl OpenInodeTable {
    pub fn new() -> Self {
        Self {
            entries: Spinlock::new(Vec::new()),
        }
    }

    /// Finds or creates the `OpenInode` for `sector`. The lookup-or-insert
    /// is atomic under the table lock, so two threads racing to open the
    /// same sector always converge on the same entry.
    pub fn open(&self, sector: u32, store: &InodeStore) -> Result<Arc<OpenInode>> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter().find(|e| e.sector == sector) {
            *existing.open_count.lock() += 1;
            return Ok(existing.clone());
        }
        let disk = store.read_home(sector)?;
        let entry = Arc::new(OpenInode::new(sector, disk));
        entries.push(entry.clone());
        Ok(entry)
    }

    /// Marks `inode` removed; the actual block release is deferred to the
    /// last `close`.
    pub fn remove(&self, inode: &OpenInode) {
        inode.mark_removed();
    }

    /// Drops a reference to `inode`. At the last close: if the inode was
    /// removed, its data blocks and home sector are released; otherwise
    /// its current disk image is written back to the home sector.
    pub fn close(&self, inode: &Arc<OpenInode>, store: &InodeStore, free_map: &dyn FreeMap) -> Result<()> {
        let mut entries = self.entries.lock();
        let remaining = {
            let mut count = inode.open_count.lock();
            debug_assert!(*count > 0, "closing an inode with no outstanding opens");
            *count -= 1;
            *count
        };
        if remaining > 0 {
            return Ok(());
        }
        entries.retain(|e| !Arc::ptr_eq(e, inode));
        drop(entries);

        let state = inode.state.lock();
        if state.removed {
            store.free(&state.disk)?;
            free_map.release(inode.sector);
            Ok(())
        } else {
            store.write_home(inode.sector, &state.disk)
        }
    }

    #[cfg(test)]
    fn resident_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for OpenInodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::free_map::BitmapFreeMap;
    use crate::SectorCache;

    fn rig(sectors: u32) -> (SectorCache, BitmapFreeMap) {
        (
            SectorCache::new(Arc::new(MemBlockDevice::new(sectors)), 16),
            BitmapFreeMap::format(sectors, 2),
        )
    }

    #[test]
    fn concurrent_opens_of_the_same_sector_share_one_entry() {
        let (cache, free_map) = rig(16);
        let store = InodeStore::new(&cache, &free_map);
        store.create(2, 0, false).unwrap();
        let table = OpenInodeTable::new();

        let a = table.open(2, &store).unwrap();
        let b = table.open(2, &store).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.resident_count(), 1);

        table.close(&a, &store, &free_map).unwrap();
        assert_eq!(table.resident_count(), 1);
        table.close(&b, &store, &free_map).unwrap();
        assert_eq!(table.resident_count(), 0);
    }

    #[test]
    fn removal_is_deferred_to_the_last_close() {
        let (cache, free_map) = rig(16);
        let store = InodeStore::new(&cache, &free_map);
        store.create(2, 0, false).unwrap();
        let table = OpenInodeTable::new();

        let a = table.open(2, &store).unwrap();
        let b = table.open(2, &store).unwrap();
        table.remove(&a);

        let before = free_map.free_space();
        table.close(&a, &store, &free_map).unwrap();
        assert_eq!(free_map.free_space(), before, "sector still open via b");

        table.close(&b, &store, &free_map).unwrap();
        assert_eq!(free_map.free_space(), before + 1, "released at last close");
    }

    #[test]
    fn writes_survive_a_close_and_reopen() {
        let (cache, free_map) = rig(16);
        let store = InodeStore::new(&cache, &free_map);
        store.create(2, 0, false).unwrap();
        let table = OpenInodeTable::new();

        let a = table.open(2, &store).unwrap();
        a.write_at(&store, &[9; 4], 0).unwrap();
        table.close(&a, &store, &free_map).unwrap();

        let b = table.open(2, &store).unwrap();
        let mut out = [0u8; 4];
        b.read_at(&store, &mut out, 0).unwrap();
        assert_eq!(out, [9; 4]);
        table.close(&b, &store, &free_map).unwrap();
    }
}
