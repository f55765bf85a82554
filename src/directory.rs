//! Directories: name-indexed entries stored as a sequence of fixed-size
//! records inside an otherwise ordinary inode-backed file.
//!
//! The entry format and linear-scan lookup mirror the teacher's own
//! `Dirent`/`dirlookup`/`dirlink`, generalized from a fixed `[u16; DIRSIZ]`
//! inode/name pair to this core's `u32` sector ids and `NAME_MAX` names.
//! Every directory is seeded at creation with `.` (itself) and `..` (its
//! parent), the same two entries the teacher's `dirlink` calls bootstrap a
//! freshly allocated directory with.

use std::sync::Arc;
use zerocopy::{AsBytes, FromBytes};

use crate::error::{Error, Result};
use crate::inode::InodeStore;
use crate::open_table::OpenInode;
use crate::param::NAME_MAX;

const ENTRY_SIZE: usize = core::mem::size_of::<DirEntry>();

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct DirEntry {
    /// Sector of the named inode's home, or `0` for a free slot.
    inum: u32,
    name: [u8; NAME_MAX],
}

impl DirEntry {
    fn free() -> Self {
        Self {
            inum: 0,
            name: [0; NAME_MAX],
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.inum != 0 && self.name_str() == name
    }

    fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        self.name = [0; NAME_MAX];
        self.name[..bytes.len()].copy_from_slice(bytes);
    }
}

/// A handle onto an open directory, built atop the same `OpenInode` a
/// regular file uses. Holds its own sector and its parent's, so `..`
/// resolves without walking back up through the path that opened it.
pub struct Directory {
    inode: Arc<OpenInode>,
    parent_sector: u32,
}

impl Directory {
    fn new(inode: Arc<OpenInode>, parent_sector: u32) -> Self {
        Self { inode, parent_sector }
    }

    pub fn sector(&self) -> u32 {
        self.inode.sector()
    }

    pub fn parent_sector(&self) -> u32 {
        self.parent_sector
    }

    pub fn open_inode(&self) -> &Arc<OpenInode> {
        &self.inode
    }

    /// Builds the root directory's handle: its own parent, by convention.
    pub fn open_root(inode: Arc<OpenInode>) -> Self {
        let root_sector = inode.sector();
        Self::new(inode, root_sector)
    }

    /// Opens a subdirectory already known to be at `sector`, recording
    /// `self` as its parent for later `..` resolution.
    pub fn go_down(&self, sector: u32, child: Arc<OpenInode>) -> Directory {
        debug_assert_eq!(child.sector(), sector);
        Self::new(child, self.sector())
    }

    /// Re-wraps an already-open inode as a directory handle sharing the
    /// same parent pointer — used when a caller holds an `Arc<OpenInode>`
    /// it knows is a directory and wants directory operations on it.
    pub fn reopen(inode: Arc<OpenInode>, parent_sector: u32) -> Directory {
        Self::new(inode, parent_sector)
    }

    fn iter_entries(&self, store: &InodeStore) -> Result<Vec<(u32, DirEntry)>> {
        let length = self.inode.length();
        let mut entries = Vec::with_capacity(length / ENTRY_SIZE);
        let mut offset = 0;
        while offset < length {
            let mut raw = [0u8; ENTRY_SIZE];
            self.inode.read_at(store, &mut raw, offset)?;
            let entry = DirEntry::read_from(raw.as_slice()).ok_or(Error::Io)?;
            entries.push((offset as u32, entry));
            offset += ENTRY_SIZE;
        }
        Ok(entries)
    }

    /// Writes the seed `.`/`..` pair into a freshly created, still-empty
    /// directory inode.
    pub fn seed(&self, store: &InodeStore) -> Result<()> {
        debug_assert_eq!(self.inode.length(), 0, "seed called on a non-empty directory");
        self.write_entry(store, 0, self.sector(), ".")?;
        self.write_entry(store, ENTRY_SIZE, self.parent_sector(), "..")?;
        Ok(())
    }

    fn write_entry(&self, store: &InodeStore, offset: usize, inum: u32, name: &str) -> Result<()> {
        let mut entry = DirEntry::free();
        entry.inum = inum;
        entry.set_name(name);
        self.inode.write_at(store, entry.as_bytes(), offset)?;
        Ok(())
    }

    /// Looks up `name`, returning the sector of the inode it names.
    pub fn lookup(&self, store: &InodeStore, name: &str) -> Result<u32> {
        self.iter_entries(store)?
            .into_iter()
            .find(|(_, e)| e.matches(name))
            .map(|(_, e)| e.inum)
            .ok_or(Error::NotFound)
    }

    /// Adds a new `name → sector` entry, reusing a free slot left by a
    /// prior `remove` before growing the directory by one entry.
    pub fn add(&self, store: &InodeStore, name: &str, sector: u32) -> Result<()> {
        if self.iter_entries(store)?.iter().any(|(_, e)| e.matches(name)) {
            return Err(Error::Exists);
        }
        let entries = self.iter_entries(store)?;
        let reuse = entries.iter().find(|(_, e)| e.inum == 0).map(|(off, _)| *off);
        let offset = reuse.unwrap_or(self.inode.length() as u32);
        self.write_entry(store, offset as usize, sector, name)
    }

    /// Clears the entry named `name`, leaving a free slot behind for reuse.
    pub fn remove(&self, store: &InodeStore, name: &str) -> Result<()> {
        let (offset, _) = self
            .iter_entries(store)?
            .into_iter()
            .find(|(_, e)| e.matches(name))
            .ok_or(Error::NotFound)?;
        let empty = DirEntry::free();
        self.inode.write_at(store, empty.as_bytes(), offset as usize)?;
        Ok(())
    }

    /// Lists every live (non-`.`/`..`, non-free) entry.
    pub fn readdir(&self, store: &InodeStore) -> Result<Vec<(String, u32)>> {
        Ok(self
            .iter_entries(store)?
            .into_iter()
            .filter(|(_, e)| e.inum != 0 && e.name_str() != "." && e.name_str() != "..")
            .map(|(_, e)| (e.name_str().to_string(), e.inum))
            .collect())
    }

    /// True once only the seeded `.`/`..` pair remains.
    pub fn is_empty(&self, store: &InodeStore) -> Result<bool> {
        Ok(self.readdir(store)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;
    use crate::free_map::{BitmapFreeMap, FreeMap};
    use crate::open_table::OpenInodeTable;
    use crate::param::ROOT_DIR_SECTOR;
    use crate::SectorCache;

    fn rig() -> (SectorCache, BitmapFreeMap, OpenInodeTable) {
        (
            SectorCache::new(Arc::new(MemBlockDevice::new(256)), 32),
            BitmapFreeMap::format(256, 2),
            OpenInodeTable::new(),
        )
    }

    #[test]
    fn seeded_root_contains_only_dot_entries() {
        let (cache, free_map, table) = rig();
        let store = InodeStore::new(&cache, &free_map);
        store.create(ROOT_DIR_SECTOR, 0, true).unwrap();
        let inode = table.open(ROOT_DIR_SECTOR, &store).unwrap();
        let root = Directory::open_root(inode);
        root.seed(&store).unwrap();

        assert!(root.is_empty(&store).unwrap());
        assert_eq!(root.lookup(&store, ".").unwrap(), ROOT_DIR_SECTOR);
        assert_eq!(root.lookup(&store, "..").unwrap(), ROOT_DIR_SECTOR);
    }

    #[test]
    fn add_lookup_and_remove_round_trip() {
        let (cache, free_map, table) = rig();
        let store = InodeStore::new(&cache, &free_map);
        store.create(ROOT_DIR_SECTOR, 0, true).unwrap();
        let inode = table.open(ROOT_DIR_SECTOR, &store).unwrap();
        let root = Directory::open_root(inode);
        root.seed(&store).unwrap();

        let child_sector = free_map.allocate().unwrap();
        store.create(child_sector, 0, false).unwrap();
        root.add(&store, "hello.txt", child_sector).unwrap();
        assert_eq!(root.lookup(&store, "hello.txt").unwrap(), child_sector);
        assert_eq!(root.readdir(&store).unwrap(), vec![("hello.txt".to_string(), child_sector)]);

        root.remove(&store, "hello.txt").unwrap();
        assert_eq!(root.lookup(&store, "hello.txt"), Err(Error::NotFound));
        assert!(root.is_empty(&store).unwrap());
    }

    #[test]
    fn add_reuses_a_slot_left_by_remove() {
        let (cache, free_map, table) = rig();
        let store = InodeStore::new(&cache, &free_map);
        store.create(ROOT_DIR_SECTOR, 0, true).unwrap();
        let inode = table.open(ROOT_DIR_SECTOR, &store).unwrap();
        let root = Directory::open_root(inode);
        root.seed(&store).unwrap();

        let a = free_map.allocate().unwrap();
        store.create(a, 0, false).unwrap();
        root.add(&store, "a", a).unwrap();
        root.remove(&store, "a").unwrap();

        let length_before = root.open_inode().length();
        let b = free_map.allocate().unwrap();
        store.create(b, 0, false).unwrap();
        root.add(&store, "b", b).unwrap();
        assert_eq!(root.open_inode().length(), length_before, "reused the freed slot");
    }

    #[test]
    fn adding_a_duplicate_name_fails() {
        let (cache, free_map, table) = rig();
        let store = InodeStore::new(&cache, &free_map);
        store.create(ROOT_DIR_SECTOR, 0, true).unwrap();
        let inode = table.open(ROOT_DIR_SECTOR, &store).unwrap();
        let root = Directory::open_root(inode);
        root.seed(&store).unwrap();

        let a = free_map.allocate().unwrap();
        store.create(a, 0, false).unwrap();
        root.add(&store, "dup", a).unwrap();
        assert_eq!(root.add(&store, "dup", a), Err(Error::Exists));
    }
}
