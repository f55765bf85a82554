//! `FilesysFacade`: the single entry point upper layers call through —
//! `create`/`open`/`remove` plus the `format`/`mount`/`shutdown` lifecycle
//! that wires a `BlockDevice` up to a `FreeMap` and `SectorCache`.
//!
//! Playing the role the teacher's `FileSystem`/`fs_init` pair plays for
//! the whole kernel: every other module in this crate is a detail this
//! facade assembles, not something upper-layer code touches directly.

use std::sync::Arc;

use crate::device::BlockDevice;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::free_map::{BitmapFreeMap, FreeMap};
use crate::inode::InodeStore;
use crate::open_table::{OpenInode, OpenInodeTable};
use crate::param::{CACHE_CAPACITY, ROOT_DIR_SECTOR};
use crate::path::PathResolver;
use crate::SectorCache;

/// A handle returned by `open`: either a directory (further path
/// resolution, `readdir`) or a plain file (`read`/`write`/`length`).
pub enum Handle {
    File(Arc<OpenInode>),
    Dir(Directory),
}

impl Handle {
    pub fn is_dir(&self) -> bool {
        matches!(self, Handle::Dir(_))
    }
}

pub struct FilesysFacade {
    device: Arc<dyn BlockDevice + Send + Sync>,
    cache: SectorCache,
    free_map: BitmapFreeMap,
    table: OpenInodeTable,
}

impl FilesysFacade {
    /// Formats `device`: a fresh free map with sectors `0` (the free map's
    /// own home) and `1` (the root directory) pre-allocated, and an empty
    /// root directory seeded with `.`/`..`.
    pub fn format(device: Arc<dyn BlockDevice + Send + Sync>) -> Result<Self> {
        let sector_count = device.sector_count();
        let free_map = BitmapFreeMap::format(sector_count, 2);
        let cache = SectorCache::new(device.clone(), CACHE_CAPACITY);
        let table = OpenInodeTable::new();

        {
            let store = InodeStore::new(&cache, &free_map);
            store.create(ROOT_DIR_SECTOR, 0, true)?;
            let inode = table.open(ROOT_DIR_SECTOR, &store)?;
            let root = Directory::open_root(inode);
            root.seed(&store)?;
            table.close(root.open_inode(), &store, &free_map)?;
        }
        free_map.close(device.as_ref())?;

        Ok(Self { device, cache, free_map, table })
    }

    /// Mounts a previously formatted `device`, reconstructing the free map
    /// from its on-disk image.
    pub fn mount(device: Arc<dyn BlockDevice + Send + Sync>) -> Result<Self> {
        let sector_count = device.sector_count();
        let free_map = BitmapFreeMap::open(device.as_ref(), sector_count)?;
        let cache = SectorCache::new(device.clone(), CACHE_CAPACITY);
        let table = OpenInodeTable::new();
        Ok(Self { device, cache, free_map, table })
    }

    fn store(&self) -> InodeStore<'_> {
        InodeStore::new(&self.cache, &self.free_map)
    }

    /// Creates a new file or directory at `path`, relative to `cwd`
    /// (`None` means root), pre-sized to `size` bytes. Rejects `.`/`..` as
    /// the new name.
    pub fn create(&self, path: &str, cwd: Option<&Directory>, size: usize, is_dir: bool) -> Result<()> {
        let store = self.store();
        let resolver = PathResolver::new(&self.table, &store, &self.free_map);
        let resolved = resolver.resolve(path, cwd)?;
        if resolved.is_root || resolved.leaf == "." || resolved.leaf == ".." {
            resolver.close(resolved.parent).ok();
            return Err(Error::InvalidPath);
        }

        let leaf = resolved.leaf;
        let parent = resolved.parent;
        if parent.lookup(&store, &leaf).is_ok() {
            resolver.close(parent)?;
            return Err(Error::Exists);
        }

        let sector = self.free_map.allocate()?;
        let released = scopeguard::guard(sector, |s| self.free_map.release(s));

        let create_result = (|| -> Result<()> {
            store.create(sector, size, is_dir)?;
            if is_dir {
                let inode = self.table.open(sector, &store)?;
                let dir = parent.go_down(sector, inode);
                dir.seed(&store)?;
                self.table.close(dir.open_inode(), &store, &self.free_map)?;
            }
            parent.add(&store, &leaf, sector)
        })();

        if create_result.is_ok() {
            scopeguard::ScopeGuard::into_inner(released);
        }
        resolver.close(parent)?;
        create_result
    }

    /// Resolves `path` and returns an open handle to whatever it names.
    pub fn open(&self, path: &str, cwd: Option<&Directory>) -> Result<Handle> {
        let store = self.store();
        let resolver = PathResolver::new(&self.table, &store, &self.free_map);
        let resolved = resolver.resolve(path, cwd)?;

        if resolved.is_root {
            return Ok(Handle::Dir(resolved.parent));
        }
        if resolved.leaf == "." {
            let sector = resolved.parent.sector();
            let parent_sector = resolved.parent.parent_sector();
            let inode = self.table.open(sector, &store)?;
            resolver.close(resolved.parent)?;
            return Ok(Handle::Dir(Directory::reopen(inode, parent_sector)));
        }
        if resolved.leaf == ".." {
            let target_sector = resolved.parent.parent_sector();
            let inode = self.table.open(target_sector, &store)?;
            let probe = Directory::reopen(inode, target_sector);
            let target_parent = probe.lookup(&store, "..")?;
            resolver.close(resolved.parent)?;
            return Ok(Handle::Dir(Directory::reopen(probe.open_inode().clone(), target_parent)));
        }

        let sector = resolved.parent.lookup(&store, &resolved.leaf);
        let sector = match sector {
            Ok(s) => s,
            Err(e) => {
                resolver.close(resolved.parent)?;
                return Err(e);
            }
        };
        let parent_sector = resolved.parent.sector();
        let inode = self.table.open(sector, &store)?;
        let is_dir = inode.is_dir();
        resolver.close(resolved.parent)?;

        if resolved.leaf_must_be_dir && !is_dir {
            self.table.close(&inode, &store, &self.free_map)?;
            return Err(Error::NotADirectory);
        }

        if is_dir {
            Ok(Handle::Dir(Directory::reopen(inode, parent_sector)))
        } else {
            Ok(Handle::File(inode))
        }
    }

    /// Removes the entry at `path`. Refuses to remove the root, a
    /// non-empty directory, or (by the caller passing it as `cwd`) any
    /// process's current directory.
    pub fn remove(&self, path: &str, cwd: Option<&Directory>) -> Result<()> {
        let store = self.store();
        let resolver = PathResolver::new(&self.table, &store, &self.free_map);
        let resolved = resolver.resolve(path, cwd)?;

        if resolved.is_root || resolved.leaf == "." || resolved.leaf == ".." {
            resolver.close(resolved.parent).ok();
            return Err(Error::Busy);
        }

        let target_sector = match resolved.parent.lookup(&store, &resolved.leaf) {
            Ok(s) => s,
            Err(e) => {
                resolver.close(resolved.parent)?;
                return Err(e);
            }
        };

        let target = self.table.open(target_sector, &store)?;
        if target.is_dir() {
            let dir = resolved.parent.go_down(target_sector, target.clone());
            match dir.is_empty(&store) {
                Ok(true) => {}
                Ok(false) => {
                    self.table.close(&target, &store, &self.free_map)?;
                    resolver.close(resolved.parent)?;
                    return Err(Error::NotEmpty);
                }
                Err(e) => {
                    self.table.close(&target, &store, &self.free_map)?;
                    resolver.close(resolved.parent)?;
                    return Err(e);
                }
            }
        }

        self.table.remove(&target);
        resolved.parent.remove(&store, &resolved.leaf)?;
        self.table.close(&target, &store, &self.free_map)?;
        resolver.close(resolved.parent)
    }

    /// Flushes every dirty cache entry and persists the free map.
    pub fn shutdown(&self) -> Result<()> {
        crate::trace!("shutting down, flushing cache and free map");
        self.cache.flush_all()?;
        self.free_map.close(self.device.as_ref())
    }

    fn inode_of<'h>(handle: &'h Handle) -> &'h Arc<OpenInode> {
        match handle {
            Handle::File(inode) => inode,
            Handle::Dir(dir) => dir.open_inode(),
        }
    }

    pub fn read(&self, handle: &Handle, buf: &mut [u8], offset: usize) -> Result<usize> {
        Self::inode_of(handle).read_at(&self.store(), buf, offset)
    }

    pub fn write(&self, handle: &Handle, buf: &[u8], offset: usize) -> Result<usize> {
        Self::inode_of(handle).write_at(&self.store(), buf, offset)
    }

    pub fn length(&self, handle: &Handle) -> usize {
        Self::inode_of(handle).length()
    }

    pub fn readdir(&self, handle: &Handle) -> Result<Vec<(String, u32)>> {
        match handle {
            Handle::Dir(dir) => dir.readdir(&self.store()),
            Handle::File(_) => Err(Error::NotADirectory),
        }
    }

    /// Gates `write` on this handle's inode off, the way a process
    /// subsystem running an executable would call this while it is
    /// mapped, to keep a running image from being overwritten underneath
    /// itself. The process subsystem itself is out of scope for this
    /// core — it only needs to be able to ask.
    pub fn deny_write(&self, handle: &Handle) {
        Self::inode_of(handle).deny_write()
    }

    /// Reverses a prior `deny_write`. Panics in debug builds if called
    /// without a matching outstanding `deny_write`.
    pub fn allow_write(&self, handle: &Handle) {
        Self::inode_of(handle).allow_write()
    }

    pub fn close(&self, handle: Handle) -> Result<()> {
        self.table.close(Self::inode_of(&handle), &self.store(), &self.free_map)
    }

    /// Sectors currently unallocated. Exposed for tests and diagnostics,
    /// not part of the facade's operation table.
    pub fn free_space(&self) -> u32 {
        self.free_map.free_space()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemBlockDevice;

    fn facade(sectors: u32) -> FilesysFacade {
        FilesysFacade::format(Arc::new(MemBlockDevice::new(sectors))).unwrap()
    }

    #[test]
    fn create_then_open_a_file_round_trips_its_name() {
        let fs = facade(64);
        fs.create("/hello.txt", None, 0, false).unwrap();
        let handle = fs.open("/hello.txt", None).unwrap();
        assert!(!handle.is_dir());
    }

    #[test]
    fn creating_the_same_name_twice_fails() {
        let fs = facade(64);
        fs.create("/a", None, 0, false).unwrap();
        assert_eq!(fs.create("/a", None, 0, false), Err(Error::Exists));
    }

    #[test]
    fn create_in_a_missing_directory_fails() {
        let fs = facade(64);
        assert_eq!(fs.create("/missing/child", None, 0, false), Err(Error::NotFound));
    }

    #[test]
    fn create_pre_sizes_the_file_and_zero_fills_it() {
        let fs = facade(64);
        fs.create("/presized", None, 1000, false).unwrap();
        let handle = fs.open("/presized", None).unwrap();
        assert_eq!(fs.length(&handle), 1000);
        let mut out = [0xFFu8; 1000];
        fs.read(&handle, &mut out, 0).unwrap();
        assert!(out.iter().all(|&b| b == 0));
        fs.close(handle).unwrap();
    }

    #[test]
    fn create_with_a_size_the_free_map_cannot_back_fails_and_allocates_nothing() {
        let fs = facade(16);
        let before = fs.free_space();
        assert_eq!(
            fs.create("/too_big", None, 50 * 512, false),
            Err(Error::NoSpace)
        );
        assert_eq!(fs.free_space(), before);
        assert_eq!(fs.open("/too_big", None).err(), Some(Error::NotFound));
    }

    #[test]
    fn readdir_lists_every_child_regardless_of_creation_order() {
        use itertools::Itertools;

        let fs = facade(64);
        fs.create("/dir", None, 0, true).unwrap();
        for name in ["c", "a", "b"] {
            fs.create(&format!("/dir/{}", name), None, 0, false).unwrap();
        }

        let handle = fs.open("/dir", None).unwrap();
        let names: Vec<String> = fs
            .readdir(&handle)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .sorted()
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        fs.close(handle).unwrap();
    }

    #[test]
    fn removing_a_non_empty_directory_fails_then_succeeds_when_empty() {
        let fs = facade(64);
        fs.create("/dir", None, 0, true).unwrap();
        fs.create("/dir/child", None, 0, false).unwrap();
        assert_eq!(fs.remove("/dir", None), Err(Error::NotEmpty));

        fs.remove("/dir/child", None).unwrap();
        fs.remove("/dir", None).unwrap();
        assert_eq!(fs.open("/dir", None).err(), Some(Error::NotFound));
    }

    #[test]
    fn removing_root_is_refused() {
        let fs = facade(64);
        assert_eq!(fs.remove("/", None), Err(Error::Busy));
    }

    #[test]
    fn deny_write_silences_writes_until_allowed_again() {
        let fs = facade(64);
        fs.create("/f", None, 0, false).unwrap();
        let handle = fs.open("/f", None).unwrap();

        fs.deny_write(&handle);
        assert_eq!(fs.write(&handle, b"nope", 0).unwrap(), 0);
        assert_eq!(fs.length(&handle), 0);

        fs.allow_write(&handle);
        assert_eq!(fs.write(&handle, b"yes", 0).unwrap(), 3);

        fs.close(handle).unwrap();
    }

    #[test]
    fn write_then_read_through_two_independent_handles() {
        let fs = facade(64);
        fs.create("/f", None, 0, false).unwrap();
        let a = fs.open("/f", None).unwrap();
        let b = fs.open("/f", None).unwrap();
        fs.write(&a, b"payload", 0).unwrap();
        let mut out = [0u8; 7];
        fs.read(&b, &mut out, 0).unwrap();
        assert_eq!(&out, b"payload");
        fs.close(a).unwrap();
        fs.close(b).unwrap();
        fs.shutdown().unwrap();
    }
}
